//! The object access operations: list, single, create, update, delete
//! and formula recalculation, all scoped to one tenant and one
//! metadata-defined table.

use crate::catalog::{self, MetadataCatalog, TableCatalog};
use crate::derive::{
    formula::{self, BackendFormula},
    links, FieldDerivationEngine, PgDerivationStore, DEFAULT_RETRY_CAP,
};
use crate::driver::{self, document_from_json_row, translate};
use crate::permission::{self, CallerContext};
use crate::registry::TenantConnectionRegistry;

use tably_core::{
    schema::FieldType,
    stmt::{Document, Value},
    Error, Result,
};
use tably_sql::{ListQuery, Sql};

use tokio_postgres::GenericClient;

/// One request against one tenant's table. The payload carries both
/// field values and the reserved list keys (`limit`, `offset`, `order`,
/// `search`, `with_relations`, `selected_relations`).
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub tenant_id: String,
    pub table_slug: String,
    pub payload: Document,
    pub caller: Option<CallerContext>,
}

#[derive(Debug, Clone)]
pub struct ListResponse {
    pub items: Vec<Document>,
    /// Total row count under the same filter, ignoring pagination.
    pub count: i64,
}

pub struct ObjectAccessService {
    registry: TenantConnectionRegistry,
    catalog: MetadataCatalog,
    retry_cap: u32,
}

impl ObjectAccessService {
    pub fn new(registry: TenantConnectionRegistry) -> Self {
        Self {
            registry,
            catalog: MetadataCatalog::new(),
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }

    pub fn with_retry_cap(mut self, retry_cap: u32) -> Self {
        self.retry_cap = retry_cap.max(1);
        self
    }

    pub fn registry(&self) -> &TenantConnectionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    /// Filtered, ordered, paginated rows plus the total count under the
    /// same filter.
    pub async fn get_list(&self, req: &Request) -> Result<ListResponse> {
        let conn = self.registry.expect(&req.tenant_id)?;
        let client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let mut payload = req.payload.clone();
        if let Some(caller) = &req.caller {
            permission::merge_automatic_filters(&*client, caller, &req.table_slug, &mut payload)
                .await?;
        }

        let relations = if payload.bool_of("with_relations") {
            catalog::resolve_relations(&*client, &req.table_slug, true).await?
        } else {
            Vec::new()
        };

        let statements = ListQuery {
            table: &catalog.table,
            fields: &catalog.fields,
            relations: &relations,
        }
        .build(&payload)?;

        let rows = driver::query(&*client, &statements.query).await?;
        let count = driver::query(&*client, &statements.count)
            .await?
            .first()
            .map(|row| row.try_get::<_, i64>(0))
            .transpose()
            .map_err(translate)?
            .unwrap_or(0);

        let visible = permission::visible_fields(&*client, &catalog, req.caller.as_ref()).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut item = document_from_json_row(row)?;
            permission::shape_document(&mut item, &catalog, visible.as_ref());
            items.push(item);
        }

        tracing::debug!(
            table = %req.table_slug,
            rows = items.len(),
            count,
            "list query served"
        );

        Ok(ListResponse { items, count })
    }

    /// One row by `guid` (or the payload's `id` fallback). Honors the
    /// same embed and shaping rules as a list of one.
    pub async fn get_single(&self, req: &Request) -> Result<Document> {
        let guid = row_key(&req.payload)?;

        let mut payload = Document::new();
        payload.insert("guid", guid.clone());
        payload.insert("limit", 1.0);
        for key in ["with_relations", "selected_relations"] {
            if let Some(value) = req.payload.get(key) {
                payload.insert(key, value.clone());
            }
        }

        let scoped = Request {
            payload,
            ..req.clone()
        };
        self.get_list(&scoped)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::not_found(format!(
                    "no `{}` row with guid `{guid}`",
                    req.table_slug
                ))
            })
    }

    /// Inserts one row: validation, derivation, the INSERT and link
    /// attachment all commit atomically. Returns the stored row.
    pub async fn create(&self, req: &Request) -> Result<Document> {
        let conn = self.registry.expect(&req.tenant_id)?;
        let mut client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let mut doc = req.payload.clone();
        if doc.str_of("guid").is_empty() {
            doc.insert("guid", uuid::Uuid::new_v4().to_string());
        }
        let guid = doc.str_of("guid");

        let tx = client.transaction().await.map_err(translate)?;
        let created = {
            let store = PgDerivationStore::new(&tx);
            let engine =
                FieldDerivationEngine::new(&catalog, &store).with_retry_cap(self.retry_cap);
            let attachments = engine.apply_on_create(&mut doc).await?;

            let insert = tably_sql::insert(&catalog.table, &catalog.fields, &doc)?;
            driver::execute(&tx, &insert).await?;

            for link in &attachments {
                links::append(&store, link).await?;
            }

            fetch_row(&tx, &catalog.table.slug, &guid)
                .await?
                .ok_or_else(|| Error::internal("inserted row did not come back"))?
        };
        tx.commit().await.map_err(translate)?;

        tracing::debug!(table = %req.table_slug, %guid, "row created");

        self.shape(&*client, &catalog, req, created).await
    }

    /// Applies a partial update to the row named by the payload's
    /// `guid` (or `id`), inside one transaction. Returns the stored row.
    pub async fn update(&self, req: &Request) -> Result<Document> {
        let conn = self.registry.expect(&req.tenant_id)?;
        let mut client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let guid = row_key(&req.payload)?;
        let mut doc = req.payload.clone();
        doc.remove("id");

        let tx = client.transaction().await.map_err(translate)?;
        let updated = {
            let old = fetch_row(&tx, &catalog.table.slug, &guid)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "no `{}` row with guid `{guid}`",
                        req.table_slug
                    ))
                })?;

            let store = PgDerivationStore::new(&tx);
            let engine =
                FieldDerivationEngine::new(&catalog, &store).with_retry_cap(self.retry_cap);
            let delta = engine.apply_on_update(&mut doc, &old).await?;

            let update = tably_sql::update(&catalog.table, &catalog.fields, &doc, &guid)?;
            driver::execute(&tx, &update).await?;

            for link in &delta.appends {
                links::append(&store, link).await?;
            }
            for link in &delta.removals {
                links::remove(&store, link).await?;
            }

            fetch_row(&tx, &catalog.table.slug, &guid)
                .await?
                .ok_or_else(|| Error::internal("updated row did not come back"))?
        };
        tx.commit().await.map_err(translate)?;

        tracing::debug!(table = %req.table_slug, %guid, "row updated");

        self.shape(&*client, &catalog, req, updated).await
    }

    /// Deletes one row; soft-delete tables keep the row and stamp
    /// `deleted_at`.
    pub async fn delete(&self, req: &Request) -> Result<()> {
        let conn = self.registry.expect(&req.tenant_id)?;
        let client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let guid = row_key(&req.payload)?;
        let affected =
            driver::execute(&*client, &tably_sql::delete(&catalog.table, &guid)).await?;
        if affected == 0 {
            return Err(Error::not_found(format!(
                "no `{}` row with guid `{guid}`",
                req.table_slug
            )));
        }

        tracing::debug!(table = %req.table_slug, %guid, "row deleted");
        Ok(())
    }

    /// Deletes every row named in the payload's `ids` array. Returns
    /// the affected count.
    pub async fn delete_many(&self, req: &Request) -> Result<u64> {
        let ids = req
            .payload
            .get("ids")
            .map(Value::coerce_string_array)
            .unwrap_or_default();
        if ids.is_empty() {
            return Err(Error::invalid_argument("delete_many requires an `ids` array"));
        }

        let conn = self.registry.expect(&req.tenant_id)?;
        let client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let affected =
            driver::execute(&*client, &tably_sql::delete_many(&catalog.table, &ids)).await?;

        tracing::debug!(table = %req.table_slug, affected, "rows deleted");
        Ok(affected)
    }

    /// Recomputes every formula field on the table: backend aggregates
    /// from their source tables, frontend expressions from each row's
    /// own values. Returns the number of rows written.
    pub async fn recalculate_formulas(&self, req: &Request) -> Result<u64> {
        let conn = self.registry.expect(&req.tenant_id)?;
        let client = conn.lock().await;
        let catalog = self
            .catalog
            .resolve(&*client, &req.tenant_id, &req.table_slug)
            .await?;

        let mut written = 0;
        for field in catalog.fields.values() {
            match field.field_type {
                FieldType::Formula => {
                    let backend = BackendFormula::from_field(field, &catalog.table.slug)?;
                    let store = PgDerivationStore::new(&*client);
                    for (guid, value) in backend.compute(&store).await? {
                        let update = Sql::new(
                            format!(
                                "UPDATE \"{}\" SET {} = $1 WHERE guid = $2",
                                catalog.table.slug, field.slug
                            ),
                            vec![Value::Number(value), Value::String(guid)],
                        );
                        written += driver::execute(&*client, &update).await?;
                    }
                }
                FieldType::FormulaFrontend if field.formula().is_some() => {
                    let filter = if catalog.table.soft_delete {
                        " WHERE a.deleted_at IS NULL"
                    } else {
                        ""
                    };
                    let select = Sql::new(
                        format!(
                            "SELECT row_to_json(a) AS data FROM \"{}\" a{filter}",
                            catalog.table.slug
                        ),
                        vec![],
                    );

                    for row in &driver::query(&*client, &select).await? {
                        let row = document_from_json_row(row)?;
                        let Ok(value) = formula::render_frontend(field, &catalog.fields, &row)
                        else {
                            continue;
                        };
                        let rendered = value.coerce_string();
                        if rendered == row.str_of(&field.slug) {
                            continue;
                        }
                        let update = Sql::new(
                            format!(
                                "UPDATE \"{}\" SET {} = $1 WHERE guid = $2",
                                catalog.table.slug, field.slug
                            ),
                            vec![Value::String(rendered), Value::String(row.str_of("guid"))],
                        );
                        written += driver::execute(&*client, &update).await?;
                    }
                }
                _ => {}
            }
        }

        tracing::debug!(table = %req.table_slug, written, "formulas recalculated");
        Ok(written)
    }

    async fn shape<C>(
        &self,
        client: &C,
        catalog: &TableCatalog,
        req: &Request,
        mut row: Document,
    ) -> Result<Document>
    where
        C: GenericClient + Sync,
    {
        let visible = permission::visible_fields(client, catalog, req.caller.as_ref()).await?;
        permission::shape_document(&mut row, catalog, visible.as_ref());
        Ok(row)
    }
}

/// Fetches one row by guid, ignoring the soft-delete filter so writes
/// can read back what they just stored.
async fn fetch_row<C>(client: &C, table_slug: &str, guid: &str) -> Result<Option<Document>>
where
    C: GenericClient + Sync,
{
    let sql = Sql::new(
        format!("SELECT row_to_json(a) AS data FROM \"{table_slug}\" a WHERE a.guid = $1"),
        vec![Value::String(guid.to_string())],
    );

    driver::query(client, &sql)
        .await?
        .first()
        .map(document_from_json_row)
        .transpose()
}

/// The row key of a payload: `guid`, falling back to `id`.
fn row_key(payload: &Document) -> Result<String> {
    let guid = payload.str_of("guid");
    if !guid.is_empty() {
        return Ok(guid);
    }
    let id = payload.str_of("id");
    if !id.is_empty() {
        return Ok(id);
    }
    Err(Error::invalid_argument(
        "payload carries neither `guid` nor `id`",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn row_key_prefers_guid_over_id() {
        assert_eq!(
            row_key(&doc(serde_json::json!({"guid": "g-1", "id": "42"}))).unwrap(),
            "g-1"
        );
        assert_eq!(row_key(&doc(serde_json::json!({"id": "42"}))).unwrap(), "42");
        assert!(row_key(&doc(serde_json::json!({})))
            .unwrap_err()
            .is_invalid_argument());
    }

    #[tokio::test]
    async fn operations_require_a_provisioned_tenant() {
        let service = ObjectAccessService::new(TenantConnectionRegistry::new());
        let req = Request {
            tenant_id: "ghost".into(),
            table_slug: "orders".into(),
            payload: doc(serde_json::json!({"guid": "g-1"})),
            caller: None,
        };

        assert!(service.get_list(&req).await.unwrap_err().is_unavailable());
        assert!(service.get_single(&req).await.unwrap_err().is_unavailable());
        assert!(service.create(&req).await.unwrap_err().is_unavailable());
        assert!(service.update(&req).await.unwrap_err().is_unavailable());
        assert!(service.delete(&req).await.unwrap_err().is_unavailable());
    }
}
