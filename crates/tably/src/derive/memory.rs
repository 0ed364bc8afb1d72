//! In-memory [`DerivationStore`] used to exercise derivation rules
//! without a database.

use super::store::{AggregateRequest, DerivationStore};

use tably_core::{
    stmt::{Document, Value},
    Error, Result,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    colliding_probes: AtomicU32,
}

#[derive(Default)]
struct Inner {
    existing: HashSet<(String, String, String)>,
    sequences: HashMap<(String, String), i64>,
    rows: HashMap<(String, String), Document>,
    relations: HashMap<String, (String, String)>,
    links: HashMap<(String, String, String), Vec<String>>,
    aggregates: HashMap<(String, String), HashMap<String, f64>>,
}

impl MemoryStore {
    pub fn insert_existing(&self, table: &str, field: &str, value: &str) {
        self.inner.lock().unwrap().existing.insert((
            table.to_string(),
            field.to_string(),
            value.to_string(),
        ));
    }

    /// Makes the next `n` uniqueness probes report a collision,
    /// whatever the candidate value is.
    pub fn collide_probes(&self, n: u32) {
        self.colliding_probes.store(n, Ordering::SeqCst);
    }

    pub fn set_sequence(&self, table: &str, field: &str, current: i64) {
        self.inner
            .lock()
            .unwrap()
            .sequences
            .insert((table.to_string(), field.to_string()), current);
    }

    pub fn insert_row(&self, table: &str, guid: &str, row: Document) {
        self.inner
            .lock()
            .unwrap()
            .rows
            .insert((table.to_string(), guid.to_string()), row);
    }

    pub fn insert_relation(&self, id: &str, from: &str, to: &str) {
        self.inner
            .lock()
            .unwrap()
            .relations
            .insert(id.to_string(), (from.to_string(), to.to_string()));
    }

    pub fn links(&self, table: &str, field: &str, guid: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .links
            .get(&(table.to_string(), field.to_string(), guid.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_aggregate(&self, table: &str, value_field: &str, grouped: HashMap<String, f64>) {
        self.inner
            .lock()
            .unwrap()
            .aggregates
            .insert((table.to_string(), value_field.to_string()), grouped);
    }
}

#[async_trait]
impl DerivationStore for MemoryStore {
    async fn value_exists(&self, table: &str, field: &str, value: &Value) -> Result<bool> {
        let pending = self.colliding_probes.load(Ordering::SeqCst);
        if pending > 0 {
            self.colliding_probes.store(pending - 1, Ordering::SeqCst);
            return Ok(true);
        }

        Ok(self.inner.lock().unwrap().existing.contains(&(
            table.to_string(),
            field.to_string(),
            value.coerce_string(),
        )))
    }

    async fn next_sequence(&self, table: &str, field: &str) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let counter = inner
            .sequences
            .get_mut(&(table.to_string(), field.to_string()))
            .ok_or_else(|| {
                Error::failed_precondition(format!("no sequence registered for `{table}.{field}`"))
            })?;
        *counter += 1;
        Ok(*counter)
    }

    async fn autofill_value(&self, table: &str, field: &str, guid: &str) -> Result<Option<Value>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rows
            .get(&(table.to_string(), guid.to_string()))
            .and_then(|row| row.get(field))
            .cloned())
    }

    async fn relation_endpoints(&self, relation_id: &str) -> Result<Option<(String, String)>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .relations
            .get(relation_id)
            .cloned())
    }

    async fn linked_ids(&self, table: &str, link_field: &str, guid: &str) -> Result<Vec<String>> {
        Ok(self.links(table, link_field, guid))
    }

    async fn store_linked_ids(
        &self,
        table: &str,
        link_field: &str,
        guid: &str,
        ids: &[String],
    ) -> Result<()> {
        self.inner.lock().unwrap().links.insert(
            (table.to_string(), link_field.to_string(), guid.to_string()),
            ids.to_vec(),
        );
        Ok(())
    }

    async fn aggregate(&self, req: AggregateRequest<'_>) -> Result<HashMap<String, f64>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .aggregates
            .get(&(req.table.to_string(), req.value_field.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
