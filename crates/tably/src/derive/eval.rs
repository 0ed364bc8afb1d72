//! A small in-process expression evaluator for frontend formula fields.
//!
//! Formulas arrive as plain arithmetic / comparison expressions whose
//! field slugs have already been substituted with literal values.
//! Evaluation happens entirely in this process with no ambient
//! authority: no I/O, no identifiers, just literals and operators.

use tably_core::{Error, Result};

/// A formula result.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl EvalValue {
    pub fn render(&self) -> String {
        match self {
            EvalValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            EvalValue::Number(n) => n.to_string(),
            EvalValue::Text(s) => s.clone(),
            EvalValue::Bool(b) => b.to_string(),
        }
    }
}

pub fn evaluate(expr: &str) -> Result<EvalValue> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::invalid_argument(format!(
            "unexpected trailing input in formula `{expr}`"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Bool(bool),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal.parse::<f64>().map_err(|_| {
                    Error::invalid_argument(format!("malformed number `{literal}` in formula"))
                })?;
                tokens.push(Token::Number(number));
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => literal.push(escaped),
                            None => {
                                return Err(Error::invalid_argument(
                                    "unterminated string in formula",
                                ))
                            }
                        },
                        Some(other) => literal.push(other),
                        None => {
                            return Err(Error::invalid_argument("unterminated string in formula"))
                        }
                    }
                }
                tokens.push(Token::Text(literal));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(Error::invalid_argument("stray `!` in formula"));
                }
                tokens.push(Token::Ne);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "unknown identifier `{word}` in formula"
                        )))
                    }
                }
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "unexpected character `{other}` in formula"
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<EvalValue> {
        let left = self.additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Le) => Token::Le,
            Some(Token::Gt) => Token::Gt,
            Some(Token::Ge) => Token::Ge,
            _ => return Ok(left),
        };
        self.next();
        let right = self.additive()?;

        let result = match (&left, &right) {
            (EvalValue::Number(a), EvalValue::Number(b)) => compare(&op, a.partial_cmp(b)),
            (EvalValue::Text(a), EvalValue::Text(b)) => compare(&op, a.partial_cmp(b)),
            (EvalValue::Bool(a), EvalValue::Bool(b)) => compare(&op, a.partial_cmp(b)),
            _ => {
                return Err(Error::invalid_argument(
                    "cannot compare values of different types in formula",
                ))
            }
        };

        Ok(EvalValue::Bool(result))
    }

    fn additive(&mut self) -> Result<EvalValue> {
        let mut left = self.multiplicative()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Token::Plus,
                Some(Token::Minus) => Token::Minus,
                _ => return Ok(left),
            };
            self.next();
            let right = self.multiplicative()?;

            left = match (op, left, right) {
                (Token::Plus, EvalValue::Number(a), EvalValue::Number(b)) => {
                    EvalValue::Number(a + b)
                }
                (Token::Plus, EvalValue::Text(a), EvalValue::Text(b)) => {
                    EvalValue::Text(format!("{a}{b}"))
                }
                (Token::Minus, EvalValue::Number(a), EvalValue::Number(b)) => {
                    EvalValue::Number(a - b)
                }
                _ => {
                    return Err(Error::invalid_argument(
                        "additive operator applied to mismatched types in formula",
                    ))
                }
            };
        }
    }

    fn multiplicative(&mut self) -> Result<EvalValue> {
        let mut left = self.unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::Percent) => Token::Percent,
                _ => return Ok(left),
            };
            self.next();
            let right = self.unary()?;

            let (EvalValue::Number(a), EvalValue::Number(b)) = (&left, &right) else {
                return Err(Error::invalid_argument(
                    "multiplicative operator applied to non-numbers in formula",
                ));
            };

            left = match op {
                Token::Star => EvalValue::Number(a * b),
                Token::Slash if *b == 0.0 => {
                    return Err(Error::invalid_argument("division by zero in formula"))
                }
                Token::Slash => EvalValue::Number(a / b),
                Token::Percent if *b == 0.0 => {
                    return Err(Error::invalid_argument("division by zero in formula"))
                }
                _ => EvalValue::Number(a % b),
            };
        }
    }

    fn unary(&mut self) -> Result<EvalValue> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let value = self.unary()?;
            let EvalValue::Number(n) = value else {
                return Err(Error::invalid_argument(
                    "unary minus applied to a non-number in formula",
                ));
            };
            return Ok(EvalValue::Number(-n));
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<EvalValue> {
        match self.next() {
            Some(Token::Number(n)) => Ok(EvalValue::Number(n)),
            Some(Token::Text(s)) => Ok(EvalValue::Text(s)),
            Some(Token::Bool(b)) => Ok(EvalValue::Bool(b)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::invalid_argument("unbalanced parentheses in formula")),
                }
            }
            other => Err(Error::invalid_argument(format!(
                "unexpected token {other:?} in formula"
            ))),
        }
    }
}

fn compare(op: &Token, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;

    let Some(ordering) = ordering else {
        return false;
    };

    match op {
        Token::Eq => ordering == Equal,
        Token::Ne => ordering != Equal,
        Token::Lt => ordering == Less,
        Token::Le => ordering != Greater,
        Token::Gt => ordering == Greater,
        Token::Ge => ordering != Less,
        _ => false,
    }
}
