//! Runtime data-access engine for metadata-driven tables.
//!
//! The engine turns a generic "get / create / update a list of objects
//! for table X with filter Y" request into parameterized SQL against a
//! per-tenant PostgreSQL database whose columns, types and relations are
//! described by control-plane metadata rather than compile-time types.
//!
//! Component map:
//!
//! - [`registry`]: per-tenant connection handles, process-wide.
//! - [`catalog`]: table / field / relation metadata resolution.
//! - [`derive`]: generated field values (sequences, randoms, autofill,
//!   formulas) and many-to-many link maintenance.
//! - [`permission`]: field- and row-level shaping per caller role.
//! - [`service`]: the object access operations tying it all together.
//! - [`driver`]: the tokio-postgres seam (value binding, row decoding,
//!   error translation).

pub mod catalog;
pub mod derive;
pub mod driver;
pub mod permission;
pub mod registry;
pub mod service;

pub use catalog::{MetadataCatalog, TableCatalog};
pub use registry::{TenantConn, TenantConnectionRegistry};
pub use service::{ListResponse, ObjectAccessService, Request};
pub use tably_core::{Error, ErrorKind, Result};
