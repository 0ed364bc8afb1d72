use crate::driver::{self, column_value, translate, PgValue};

use tably_core::{stmt::Value, Error, Result};
use tably_sql::Sql;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio_postgres::GenericClient;

/// Aggregate functions a formula field may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Sum,
    Max,
    Avg,
}

impl AggregateKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            // historical spelling kept for stored metadata
            "SUMM" | "SUM" => Some(Self::Sum),
            "MAX" => Some(Self::Max),
            "AVG" => Some(Self::Avg),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        }
    }
}

/// One grouped aggregate over a source table: `KIND(value_field) ...
/// GROUP BY group_field`, optionally narrowed by equality / membership
/// filters.
#[derive(Debug, Clone)]
pub struct AggregateRequest<'a> {
    pub table: &'a str,
    pub value_field: &'a str,
    pub group_field: &'a str,
    pub kind: AggregateKind,
    pub filters: &'a [(String, Value)],
}

/// The database operations field derivation needs. The engine itself is
/// pure; everything stateful goes through this seam so derivation rules
/// can be exercised against an in-memory store.
#[async_trait]
pub trait DerivationStore: Send + Sync {
    /// Does any row of `table` already carry `value` in `field`?
    async fn value_exists(&self, table: &str, field: &str, value: &Value) -> Result<bool>;

    /// Atomically advances and returns the named counter.
    async fn next_sequence(&self, table: &str, field: &str) -> Result<i64>;

    /// Reads `field` from the `table` row identified by `guid`.
    async fn autofill_value(&self, table: &str, field: &str, guid: &str) -> Result<Option<Value>>;

    /// Resolves a relation id to its `(table_from, table_to)` pair.
    async fn relation_endpoints(&self, relation_id: &str) -> Result<Option<(String, String)>>;

    /// Reads the id array stored in `link_field` of one row.
    async fn linked_ids(&self, table: &str, link_field: &str, guid: &str) -> Result<Vec<String>>;

    /// Replaces the id array stored in `link_field` of one row.
    async fn store_linked_ids(
        &self,
        table: &str,
        link_field: &str,
        guid: &str,
        ids: &[String],
    ) -> Result<()>;

    /// Runs a grouped aggregate, returning group key to value.
    async fn aggregate(&self, req: AggregateRequest<'_>) -> Result<HashMap<String, f64>>;
}

/// [`DerivationStore`] over a live connection or transaction.
///
/// Identifiers interpolated below come from catalog metadata, never
/// from request payloads; payload values are always bound.
pub struct PgDerivationStore<'a, C> {
    client: &'a C,
}

impl<'a, C> PgDerivationStore<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> DerivationStore for PgDerivationStore<'_, C>
where
    C: GenericClient + Sync,
{
    async fn value_exists(&self, table: &str, field: &str, value: &Value) -> Result<bool> {
        let sql = Sql::new(
            format!("SELECT COUNT(*) FROM \"{table}\" WHERE {field} = $1"),
            vec![value.clone()],
        );

        let rows = driver::query(self.client, &sql).await?;
        let count: i64 = rows
            .first()
            .map(|row| row.try_get(0))
            .transpose()
            .map_err(translate)?
            .unwrap_or(0);

        Ok(count > 0)
    }

    async fn next_sequence(&self, table: &str, field: &str) -> Result<i64> {
        let args: Vec<PgValue> = vec![
            Value::String(table.to_string()).into(),
            Value::String(field.to_string()).into(),
        ];
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            args.iter().map(|arg| arg as _).collect();

        let row = self
            .client
            .query_opt(
                "UPDATE \"incrementseqs\" SET increment_by = increment_by + 1 \
                 WHERE table_slug = $1 AND field_slug = $2 RETURNING increment_by",
                &refs,
            )
            .await
            .map_err(translate)?
            .ok_or_else(|| {
                Error::failed_precondition(format!(
                    "no sequence registered for `{table}.{field}`"
                ))
            })?;

        let next = row
            .try_get::<_, i64>(0)
            .or_else(|_| row.try_get::<_, i32>(0).map(i64::from))
            .map_err(translate)?;

        Ok(next)
    }

    async fn autofill_value(&self, table: &str, field: &str, guid: &str) -> Result<Option<Value>> {
        let sql = Sql::new(
            format!("SELECT {field} FROM \"{table}\" WHERE guid = $1"),
            vec![Value::String(guid.to_string())],
        );

        let rows = driver::query(self.client, &sql).await?;
        match rows.first() {
            Some(row) => Ok(Some(column_value(row, 0)?)),
            None => Ok(None),
        }
    }

    async fn relation_endpoints(&self, relation_id: &str) -> Result<Option<(String, String)>> {
        let sql = Sql::new(
            "SELECT table_from, table_to FROM \"relation\" WHERE id = $1",
            vec![Value::String(relation_id.to_string())],
        );

        let rows = driver::query(self.client, &sql).await?;
        match rows.first() {
            Some(row) => {
                let from: String = row.try_get(0).map_err(translate)?;
                let to: String = row.try_get(1).map_err(translate)?;
                Ok(Some((from, to)))
            }
            None => Ok(None),
        }
    }

    async fn linked_ids(&self, table: &str, link_field: &str, guid: &str) -> Result<Vec<String>> {
        let sql = Sql::new(
            format!("SELECT {link_field} FROM \"{table}\" WHERE guid = $1"),
            vec![Value::String(guid.to_string())],
        );

        let rows = driver::query(self.client, &sql).await?;
        match rows.first() {
            Some(row) => Ok(column_value(row, 0)?.coerce_string_array()),
            None => Ok(Vec::new()),
        }
    }

    async fn store_linked_ids(
        &self,
        table: &str,
        link_field: &str,
        guid: &str,
        ids: &[String],
    ) -> Result<()> {
        let sql = Sql::new(
            format!("UPDATE \"{table}\" SET {link_field} = $1 WHERE guid = $2"),
            vec![
                Value::StringArray(ids.to_vec()),
                Value::String(guid.to_string()),
            ],
        );

        driver::execute(self.client, &sql).await?;
        Ok(())
    }

    async fn aggregate(&self, req: AggregateRequest<'_>) -> Result<HashMap<String, f64>> {
        let mut params: Vec<Value> = Vec::new();
        let mut filter = String::new();
        for (field, value) in req.filters {
            params.push(value.clone());
            let n = params.len();
            match value {
                Value::StringArray(_) => {
                    filter.push_str(&format!(" AND {field}::VARCHAR = ANY(${n})"))
                }
                _ => filter.push_str(&format!(" AND {field} = ${n}")),
            }
        }

        let sql = Sql::new(
            format!(
                "SELECT {group}::VARCHAR, {kind}({value})::FLOAT8 FROM \"{table}\" \
                 WHERE {group} IS NOT NULL{filter} GROUP BY {group}",
                group = req.group_field,
                kind = req.kind.sql(),
                value = req.value_field,
                table = req.table,
            ),
            params,
        );

        let rows = driver::query(self.client, &sql).await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.try_get(0).map_err(translate)?;
            let value: Option<f64> = row.try_get(1).map_err(translate)?;
            out.insert(key, value.unwrap_or(0.0));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aggregate_kind_accepts_the_stored_spelling() {
        assert_eq!(AggregateKind::parse("SUMM"), Some(AggregateKind::Sum));
        assert_eq!(AggregateKind::parse("SUM"), Some(AggregateKind::Sum));
        assert_eq!(AggregateKind::parse("MAX"), Some(AggregateKind::Max));
        assert_eq!(AggregateKind::parse("AVG"), Some(AggregateKind::Avg));
        assert_eq!(AggregateKind::parse("COUNT"), None);
    }
}
