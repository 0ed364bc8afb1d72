use std::fmt;

/// Comparison operators recognized inside a filter document, e.g.
/// `{"amount": {"$gt": 5}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    /// `$in` compares the column, cast to VARCHAR, against a value list.
    In,
}

impl CmpOp {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$in" => Some(Self::In),
            _ => None,
        }
    }

    /// The SQL operator token; `In` is rendered specially by the builder.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "= ANY",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}
