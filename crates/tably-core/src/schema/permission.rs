use crate::stmt::Document;

/// Per (role, table, field) visibility and edit grants.
#[derive(Debug, Clone)]
pub struct FieldPermission {
    pub guid: String,
    pub role_id: String,
    pub table_slug: String,
    pub field_id: String,
    pub view_permission: bool,
    pub edit_permission: bool,
    pub label: String,
}

impl FieldPermission {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            guid: doc.str_of("guid"),
            role_id: doc.str_of("role_id"),
            table_slug: doc.str_of("table_slug"),
            field_id: doc.str_of("field_id"),
            view_permission: doc.bool_of("view_permission"),
            edit_permission: doc.bool_of("edit_permission"),
            label: doc.str_of("label"),
        }
    }
}

/// Row-level read filter attached to a (role, table) pair. Merged into the
/// request's filter document before compilation so list counts stay
/// consistent with the rows returned.
#[derive(Debug, Clone)]
pub struct AutomaticFilter {
    pub role_id: String,
    pub table_slug: String,
    /// The column the filter constrains; `user_id` selects the caller's
    /// own rows, `<table>_id` a table-scoped object.
    pub custom_field: String,
    /// The object providing the filter value, optionally suffixed with
    /// `#<relation_id>` to resolve through a relation chain.
    pub object_field: String,
    /// Suppresses the filter for tab-scoped reads.
    pub not_use_in_tab: bool,
}

impl AutomaticFilter {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            role_id: doc.str_of("role_id"),
            table_slug: doc.str_of("table_slug"),
            custom_field: doc.str_of("custom_field"),
            object_field: doc.str_of("object_field"),
            not_use_in_tab: doc.bool_of("not_use_in_tab"),
        }
    }
}
