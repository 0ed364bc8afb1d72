use tably_core::stmt::Value;

use std::fmt::Write;

/// Sink for statement arguments.
///
/// Pushing an argument yields the placeholder that must be rendered for
/// it, which keeps placeholder numbering and argument order consistent by
/// construction.
pub trait Params {
    fn push(&mut self, param: Value) -> Placeholder;
}

/// A 1-based `$n` statement placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder(pub usize);

impl Params for Vec<Value> {
    fn push(&mut self, value: Value) -> Placeholder {
        self.push(value);
        Placeholder(self.len())
    }
}

impl Placeholder {
    pub fn write(self, dst: &mut String) {
        write!(dst, "${}", self.0).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_monotonically_numbered() {
        let mut params: Vec<Value> = Vec::new();

        let first = Params::push(&mut params, Value::from("a"));
        let second = Params::push(&mut params, Value::from(2.0));

        assert_eq!(first, Placeholder(1));
        assert_eq!(second, Placeholder(2));
        assert_eq!(params.len(), 2);
    }
}
