//! Core types for the Tably object access engine.
//!
//! Everything in this crate is metadata or data that flows between the
//! query builder, the derivation engine and the runtime service: table /
//! field / relation descriptors loaded from the control-plane schema, the
//! tagged [`stmt::Value`] model used for dynamic rows, and the structured
//! [`Error`] type that every component reports through.

pub mod schema;
pub mod stmt;

mod error;
pub use error::{Error, ErrorKind};

/// A Result type alias that uses Tably's [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
