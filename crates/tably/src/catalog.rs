//! Resolves table, field and relation metadata from a tenant's
//! control-plane tables (`table`, `field`, `relation`).
//!
//! Resolution happens per request; tables flagged `is_cached` keep
//! their resolved catalog in a process-wide cache keyed by tenant and
//! slug. The cache is invalidated explicitly when metadata changes.

use crate::driver::{self, document_from_json_row};

use tably_core::{
    schema::{Field, Relation, Table},
    stmt::{Document, Value},
    Error, Result,
};
use tably_sql::Sql;

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_postgres::GenericClient;

/// A table's resolved metadata: the table row plus its fields in
/// catalog order, keyed by slug.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    pub table: Table,
    pub fields: IndexMap<String, Field>,
}

pub struct MetadataCatalog {
    cache: RwLock<HashMap<(String, String), Arc<TableCatalog>>>,
}

impl MetadataCatalog {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves the catalog for `slug`, consulting the cache first for
    /// tables that opted into caching.
    pub async fn resolve<C>(&self, client: &C, tenant_id: &str, slug: &str) -> Result<Arc<TableCatalog>>
    where
        C: GenericClient + Sync,
    {
        let key = (tenant_id.to_string(), slug.to_string());
        if let Some(cached) = self.cache.read().unwrap().get(&key) {
            return Ok(Arc::clone(cached));
        }

        let table = resolve_table(client, slug).await?;
        let fields = resolve_fields(client, slug).await?;
        let catalog = Arc::new(TableCatalog { table, fields });

        if catalog.table.is_cached {
            self.cache
                .write()
                .unwrap()
                .insert(key, Arc::clone(&catalog));
        }

        Ok(catalog)
    }

    /// Drops the cached catalog for one table, if present.
    pub fn invalidate(&self, tenant_id: &str, slug: &str) {
        self.cache
            .write()
            .unwrap()
            .remove(&(tenant_id.to_string(), slug.to_string()));
    }

    /// Drops every cached catalog for a tenant.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.cache
            .write()
            .unwrap()
            .retain(|(tenant, _), _| tenant != tenant_id);
    }
}

impl Default for MetadataCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads the `table` row for a slug. A missing row is a configuration
/// error surfaced as `NotFound`.
pub async fn resolve_table<C>(client: &C, slug: &str) -> Result<Table>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(t) AS data FROM \"table\" t \
         WHERE t.slug = $1 AND t.deleted_at IS NULL",
        vec![Value::String(slug.to_string())],
    );

    let rows = driver::query(client, &sql).await?;
    let Some(row) = rows.first() else {
        return Err(Error::not_found(format!("table `{slug}` is not defined")));
    };

    Table::from_document(&document_from_json_row(row)?)
}

/// Loads the field definitions for a table, in catalog order. A table
/// with zero fields is a configuration error.
pub async fn resolve_fields<C>(client: &C, slug: &str) -> Result<IndexMap<String, Field>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(f) AS data FROM \"field\" f \
         JOIN \"table\" t ON f.table_id = t.id \
         WHERE t.slug = $1 AND f.deleted_at IS NULL ORDER BY f.id",
        vec![Value::String(slug.to_string())],
    );

    let rows = driver::query(client, &sql).await?;
    let mut fields = IndexMap::with_capacity(rows.len());
    for row in &rows {
        let field = Field::from_document(&document_from_json_row(row)?)?;
        fields.insert(field.slug.clone(), field);
    }

    if fields.is_empty() {
        return Err(Error::not_found(format!(
            "table `{slug}` has no fields configured"
        )));
    }

    Ok(fields)
}

/// Loads relations touching a table. With `embeddable_only`, relation
/// kinds that cannot be embedded as a correlated row (many-to-many and
/// friends) are filtered out. Rows with an unknown relation kind are
/// skipped with a warning rather than failing the read.
pub async fn resolve_relations<C>(client: &C, slug: &str, embeddable_only: bool) -> Result<Vec<Relation>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(r) AS data FROM \"relation\" r \
         WHERE (r.table_from = $1 OR r.table_to = $1) AND r.deleted_at IS NULL",
        vec![Value::String(slug.to_string())],
    );

    let rows = driver::query(client, &sql).await?;
    let mut relations = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc = document_from_json_row(row)?;
        match Relation::from_document(&doc) {
            Ok(relation) => {
                if !embeddable_only || relation.embeddable() {
                    relations.push(relation);
                }
            }
            Err(err) => {
                tracing::warn!(table = slug, %err, "skipping malformed relation row");
            }
        }
    }

    Ok(relations)
}

/// Loads a single relation by id.
pub async fn resolve_relation_by_id<C>(client: &C, relation_id: &str) -> Result<Option<Relation>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        "SELECT row_to_json(r) AS data FROM \"relation\" r WHERE r.id = $1",
        vec![Value::String(relation_id.to_string())],
    );

    let rows = driver::query(client, &sql).await?;
    match rows.first() {
        Some(row) => Ok(Some(Relation::from_document(&document_from_json_row(
            row,
        )?)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tably_core::schema::FieldType;

    fn table_doc() -> Document {
        Document::from_json(serde_json::json!({
            "id": "t-1",
            "slug": "orders",
            "label": "Orders",
            "soft_delete": true,
            "is_cached": true,
            "order_by": false
        }))
        .unwrap()
    }

    #[test]
    fn cached_catalogs_are_keyed_per_tenant() {
        let catalog = MetadataCatalog::new();
        let table = Table::from_document(&table_doc()).unwrap();
        let mut fields = IndexMap::new();
        fields.insert(
            "status".to_string(),
            Field {
                id: "f-1".into(),
                table_id: "t-1".into(),
                slug: "status".into(),
                label: "Status".into(),
                field_type: FieldType::SingleLine,
                required: false,
                unique: false,
                is_search: false,
                autofill_table: None,
                autofill_field: None,
                relation_id: None,
                attributes: Document::new(),
            },
        );

        let resolved = Arc::new(TableCatalog { table, fields });
        catalog.cache.write().unwrap().insert(
            ("acme".to_string(), "orders".to_string()),
            Arc::clone(&resolved),
        );

        assert!(catalog
            .cache
            .read()
            .unwrap()
            .contains_key(&("acme".to_string(), "orders".to_string())));

        catalog.invalidate_tenant("other");
        assert_eq!(catalog.cache.read().unwrap().len(), 1);

        catalog.invalidate("acme", "orders");
        assert!(catalog.cache.read().unwrap().is_empty());
    }
}
