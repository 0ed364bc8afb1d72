use crate::{stmt::Document, Error, Result};

/// Table metadata from the control-plane schema. `slug` doubles as the
/// physical table name, so it is the only identifier ever interpolated
/// into SQL for end-user data, and it always comes from the catalog.
#[derive(Debug, Clone)]
pub struct Table {
    pub id: String,
    pub slug: String,
    pub label: String,
    /// Deletes set `deleted_at` instead of removing rows.
    pub soft_delete: bool,
    /// Opt-in for in-process metadata caching.
    pub is_cached: bool,
    /// The table carries an INCREMENT_NUMBER serial column.
    pub with_increment_id: bool,
    /// Default list order: `created_at DESC` when true, ASC when false.
    pub order_by: bool,
}

impl Table {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let slug = doc.str_of("slug");
        if slug.is_empty() {
            return Err(Error::internal("table row is missing a slug"));
        }

        Ok(Self {
            id: doc.str_of("id"),
            slug,
            label: doc.str_of("label"),
            soft_delete: doc.bool_of("soft_delete"),
            is_cached: doc.bool_of("is_cached"),
            with_increment_id: doc.bool_of("with_increment_id"),
            order_by: doc.bool_of("order_by"),
        })
    }
}
