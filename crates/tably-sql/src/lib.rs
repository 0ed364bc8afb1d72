//! Compiles generic filter / sort / paginate / relation-embed requests
//! plus catalog metadata into parameterized PostgreSQL statements.
//!
//! User-supplied values only ever enter a statement through a numbered
//! placeholder pushed into a [`Params`] sink; identifiers (table and
//! column names) come exclusively from trusted catalog metadata. The
//! compiled statement and its argument list are length-consistent by
//! construction: every `$n` in the text corresponds to the n-th pushed
//! argument.

mod params;
pub use params::{Params, Placeholder};

mod select;
pub use select::{ListQuery, ListStatements};

mod write;
pub use write::{delete, delete_many, insert, update};

#[cfg(test)]
mod test_util;

use tably_core::stmt::Value;

/// A serialized statement together with its bound arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Sql {
    pub text: String,
    pub params: Vec<Value>,
}

impl Sql {
    pub fn new(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }
}

/// Reserved payload keys consumed by the builder itself; everything else
/// is a candidate field filter.
pub(crate) const RESERVED_KEYS: &[&str] = &[
    "limit",
    "offset",
    "order",
    "search",
    "auto_filter",
    "with_relations",
    "selected_relations",
];
