//! Field- and row-level shaping per caller role.
//!
//! Two mechanisms, both resolved from control-plane tables:
//!
//! - field permissions: per (role, table, field) view/edit grants that
//!   decide which columns a response may carry;
//! - automatic filters: per (role, table) row constraints merged into
//!   the request filter before compilation, so the count query and the
//!   row query stay consistent.

use crate::catalog::{self, TableCatalog};
use crate::driver::{self, document_from_json_row};

use tably_core::{
    schema::{AutomaticFilter, FieldPermission, FieldType, RelationKind},
    stmt::{Document, Value},
    Result,
};
use tably_sql::Sql;

use std::collections::{HashMap, HashSet};
use tokio_postgres::GenericClient;

/// Who is asking. `role_id` drives shaping and automatic filters;
/// `user_id` feeds `user_id`-scoped filters; `objects` carries the
/// caller's bound objects as `(table_slug, object_guid)` pairs.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub role_id: Option<String>,
    pub user_id: Option<String>,
    pub objects: Vec<(String, String)>,
}

impl CallerContext {
    pub fn object_for(&self, table_slug: &str) -> Option<&str> {
        self.objects
            .iter()
            .find(|(slug, _)| slug == table_slug)
            .map(|(_, guid)| guid.as_str())
    }
}

/// Loads the caller role's field grants for one table, keyed by field id.
pub async fn load_field_permissions<C>(
    client: &C,
    role_id: &str,
    table_slug: &str,
) -> Result<HashMap<String, FieldPermission>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(p) AS data FROM \"field_permission\" p \
         WHERE p.role_id = $1 AND p.table_slug = $2 AND p.deleted_at IS NULL",
        vec![
            Value::String(role_id.to_string()),
            Value::String(table_slug.to_string()),
        ],
    );

    let rows = driver::query(client, &sql).await?;
    let mut grants = HashMap::with_capacity(rows.len());
    for row in &rows {
        let grant = FieldPermission::from_document(&document_from_json_row(row)?);
        grants.insert(grant.field_id.clone(), grant);
    }

    Ok(grants)
}

/// Computes the set of visible field slugs for a role. `None` means no
/// shaping applies (anonymous/system callers see everything). With a
/// role, only fields with an explicit view grant remain.
pub async fn visible_fields<C>(
    client: &C,
    catalog: &TableCatalog,
    caller: Option<&CallerContext>,
) -> Result<Option<HashSet<String>>>
where
    C: GenericClient + Sync,
{
    let Some(role_id) = caller.and_then(|caller| caller.role_id.as_deref()) else {
        return Ok(None);
    };

    let grants = load_field_permissions(client, role_id, &catalog.table.slug).await?;

    let visible = catalog
        .fields
        .values()
        .filter(|field| {
            grants
                .get(&field.id)
                .map(|grant| grant.view_permission)
                .unwrap_or(false)
        })
        .map(|field| field.slug.clone())
        .collect();

    Ok(Some(visible))
}

/// A catalog field annotated with the caller's grants.
#[derive(Debug, Clone)]
pub struct ShapedField<'a> {
    pub field: &'a tably_core::schema::Field,
    pub view: bool,
    pub edit: bool,
}

/// Annotates every catalog field with the role's view/edit grants.
/// Without a role, everything is visible and editable.
pub fn shape_fields<'a>(
    catalog: &'a TableCatalog,
    grants: &HashMap<String, FieldPermission>,
    role_id: Option<&str>,
) -> Vec<ShapedField<'a>> {
    catalog
        .fields
        .values()
        .map(|field| {
            let (view, edit) = match role_id {
                None => (true, true),
                Some(_) => grants
                    .get(&field.id)
                    .map(|grant| (grant.view_permission, grant.edit_permission))
                    .unwrap_or((false, false)),
            };
            ShapedField { field, view, edit }
        })
        .collect()
}

/// Keys every response carries regardless of grants.
const SYSTEM_KEYS: &[&str] = &["guid", "id", "created_at", "updated_at", "deleted_at"];

/// Shapes one outgoing document: password-typed columns are always
/// removed, and with a visibility set, catalog fields outside it are
/// dropped. Embed keys (`<x>_id_data`) follow the visibility of their
/// base `<x>_id` field.
pub fn shape_document(
    doc: &mut Document,
    catalog: &TableCatalog,
    visible: Option<&HashSet<String>>,
) {
    let drop: Vec<String> = doc
        .keys()
        .filter(|&key| {
            let base = key.strip_suffix("_data").unwrap_or(key);
            if let Some(field) = catalog.fields.get(base) {
                if field.field_type == FieldType::Password {
                    return true;
                }
                if let Some(visible) = visible {
                    return !visible.contains(base) && !SYSTEM_KEYS.contains(&base);
                }
            }
            false
        })
        .map(str::to_string)
        .collect();

    for key in drop {
        doc.remove(&key);
    }
}

/// Loads the automatic filter bound to (role, table) for reads, if any.
async fn load_automatic_filter<C>(
    client: &C,
    role_id: &str,
    table_slug: &str,
) -> Result<Option<AutomaticFilter>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(f) AS data FROM \"automatic_filter\" f \
         WHERE f.role_id = $1 AND f.table_slug = $2 AND f.deleted_at IS NULL",
        vec![
            Value::String(role_id.to_string()),
            Value::String(table_slug.to_string()),
        ],
    );

    let rows = driver::query(client, &sql).await?;
    Ok(rows
        .first()
        .map(|row| document_from_json_row(row).map(|doc| AutomaticFilter::from_document(&doc)))
        .transpose()?)
}

/// Merges the caller's automatic filter into a list payload, before the
/// payload is compiled. No-op without a role or a configured filter.
pub async fn merge_automatic_filters<C>(
    client: &C,
    caller: &CallerContext,
    table_slug: &str,
    payload: &mut Document,
) -> Result<()>
where
    C: GenericClient + Sync,
{
    let Some(role_id) = caller.role_id.as_deref() else {
        return Ok(());
    };
    let Some(filter) = load_automatic_filter(client, role_id, table_slug).await? else {
        return Ok(());
    };
    if filter.not_use_in_tab {
        return Ok(());
    }

    let mut custom_field = filter.custom_field.clone();
    let mut object_field = filter.object_field.clone();

    // `object_field` may point through a relation: `<table>#<relation_id>`.
    if let Some((table, relation_id)) = object_field.split_once('#') {
        let table = table.to_string();
        if let Some(relation) = catalog::resolve_relation_by_id(client, relation_id).await? {
            if relation.kind == RelationKind::Many2One {
                custom_field = relation.field_from.clone();
            }
        }
        object_field = table;
    }

    if custom_field == "user_id" {
        if object_field != table_slug {
            if let Some(user_id) = caller.user_id.as_deref() {
                payload.insert(format!("{object_field}_id"), user_id.to_string());
            }
        }
        return Ok(());
    }

    // Table-scoped filter: constrain by the caller's bound object of the
    // referenced table, either through the foreign key column or, when
    // the filter targets the table itself, by guid.
    let bound_table = custom_field.strip_suffix("_id").unwrap_or(&custom_field);
    if let Some(object_guid) = caller.object_for(bound_table) {
        if bound_table == table_slug {
            payload.insert("guid", object_guid.to_string());
        } else {
            payload.insert(custom_field, object_guid.to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use tably_core::schema::{Field, Table};

    fn catalog() -> TableCatalog {
        let table = Table {
            id: "t-1".into(),
            slug: "orders".into(),
            label: "Orders".into(),
            soft_delete: true,
            is_cached: false,
            with_increment_id: false,
            order_by: false,
        };

        let mut fields = IndexMap::new();
        for (slug, ty) in [
            ("status", FieldType::SingleLine),
            ("secret", FieldType::Password),
            ("client_id", FieldType::Lookup),
        ] {
            fields.insert(
                slug.to_string(),
                Field {
                    id: format!("f-{slug}"),
                    table_id: "t-1".into(),
                    slug: slug.into(),
                    label: slug.into(),
                    field_type: ty,
                    required: false,
                    unique: false,
                    is_search: false,
                    autofill_table: None,
                    autofill_field: None,
                    relation_id: None,
                    attributes: Document::new(),
                },
            );
        }

        TableCatalog { table, fields }
    }

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn password_fields_are_always_stripped() {
        let catalog = catalog();
        let mut row = doc(serde_json::json!({
            "guid": "g-1",
            "status": "open",
            "secret": "sha256$..."
        }));

        shape_document(&mut row, &catalog, None);

        assert!(row.get("secret").is_none());
        assert_eq!(row.str_of("status"), "open");
    }

    #[test]
    fn visibility_set_drops_unlisted_catalog_fields_but_keeps_system_keys() {
        let catalog = catalog();
        let mut row = doc(serde_json::json!({
            "guid": "g-1",
            "created_at": "2026-01-01T00:00:00Z",
            "status": "open",
            "client_id": "c-1",
            "client_id_data": {"guid": "c-1"}
        }));

        let visible: HashSet<String> = ["status".to_string()].into_iter().collect();
        shape_document(&mut row, &catalog, Some(&visible));

        assert_eq!(row.str_of("status"), "open");
        assert_eq!(row.str_of("guid"), "g-1");
        assert!(row.get("client_id").is_none());
        assert!(row.get("client_id_data").is_none());
        assert!(row.get("created_at").is_some());
    }

    #[test]
    fn field_grants_annotate_view_and_edit() {
        let catalog = catalog();

        let open = shape_fields(&catalog, &HashMap::new(), None);
        assert!(open.iter().all(|shaped| shaped.view && shaped.edit));

        let mut grants = HashMap::new();
        grants.insert(
            "f-status".to_string(),
            FieldPermission {
                guid: "p-1".into(),
                role_id: "r-1".into(),
                table_slug: "orders".into(),
                field_id: "f-status".into(),
                view_permission: true,
                edit_permission: false,
                label: "Status".into(),
            },
        );

        let shaped = shape_fields(&catalog, &grants, Some("r-1"));
        let status = shaped
            .iter()
            .find(|shaped| shaped.field.slug == "status")
            .unwrap();
        assert!(status.view && !status.edit);
        let secret = shaped
            .iter()
            .find(|shaped| shaped.field.slug == "secret")
            .unwrap();
        assert!(!secret.view && !secret.edit);
    }

    #[test]
    fn caller_object_lookup_matches_table_slug() {
        let caller = CallerContext {
            role_id: Some("r-1".into()),
            user_id: Some("u-1".into()),
            objects: vec![("branch".into(), "b-9".into())],
        };

        assert_eq!(caller.object_for("branch"), Some("b-9"));
        assert_eq!(caller.object_for("orders"), None);
    }
}
