use tably_core::{Error, Result};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_postgres::Client;

/// A shared handle to one tenant's database connection.
///
/// Statements run behind an async mutex because transactions need
/// exclusive access to the client for their lifetime.
#[derive(Clone)]
pub struct TenantConn {
    client: Arc<tokio::sync::Mutex<Client>>,
}

impl TenantConn {
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(tokio::sync::Mutex::new(client)),
        }
    }

    /// Connects to `url` and wraps the resulting client.
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(crate::driver::connect(url).await?))
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Client> {
        self.client.lock().await
    }
}

impl std::fmt::Debug for TenantConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConn").finish_non_exhaustive()
    }
}

/// Process-wide map from tenant id to its connection handle.
///
/// All access goes through the interior lock; the bare-map races the
/// old per-request lookup pattern allowed are structurally impossible
/// here. Handles are cheap clones, so readers never hold the lock
/// across a database call.
pub struct TenantConnectionRegistry<C = TenantConn> {
    inner: RwLock<HashMap<String, C>>,
}

impl<C: Clone> TenantConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tenant's handle, or `None` when the tenant has not
    /// been provisioned in this process.
    pub fn get(&self, tenant_id: &str) -> Option<C> {
        self.inner.read().unwrap().get(tenant_id).cloned()
    }

    /// Like [`get`](Self::get), but surfaces the miss as `Unavailable`.
    pub fn expect(&self, tenant_id: &str) -> Result<C> {
        self.get(tenant_id).ok_or_else(|| {
            Error::unavailable(format!("tenant `{tenant_id}` has no registered connection"))
        })
    }

    /// Registers a handle for the tenant. A handle that is already
    /// present wins; concurrent provisioning of the same tenant must
    /// not tear down a connection another request is using.
    pub fn add(&self, tenant_id: impl Into<String>, conn: C) -> C {
        self.inner
            .write()
            .unwrap()
            .entry(tenant_id.into())
            .or_insert(conn)
            .clone()
    }

    /// Drops the tenant's handle. Requests already holding a clone keep
    /// working until they release it.
    pub fn remove(&self, tenant_id: &str) -> Option<C> {
        self.inner.write().unwrap().remove(tenant_id)
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.inner.read().unwrap().contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl<C: Clone> Default for TenantConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_is_first_writer_wins() {
        let registry = TenantConnectionRegistry::<u32>::new();
        assert_eq!(registry.add("acme", 1), 1);
        assert_eq!(registry.add("acme", 2), 1);
        assert_eq!(registry.get("acme"), Some(1));
    }

    #[test]
    fn expect_reports_unprovisioned_tenants() {
        let registry = TenantConnectionRegistry::<u32>::new();
        let err = registry.expect("ghost").unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn remove_frees_the_slot() {
        let registry = TenantConnectionRegistry::<u32>::new();
        registry.add("acme", 1);
        assert_eq!(registry.remove("acme"), Some(1));
        assert!(!registry.contains("acme"));
        assert_eq!(registry.add("acme", 2), 2);
    }

    #[test]
    fn concurrent_provisioning_keeps_one_handle_per_tenant() {
        let registry = Arc::new(TenantConnectionRegistry::<u32>::new());

        let handles: Vec<_> = (0..16)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for tenant in 0..8 {
                        registry.add(format!("tenant-{tenant}"), worker);
                        let _ = registry.get(&format!("tenant-{tenant}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
        for tenant in 0..8 {
            let value = registry.get(&format!("tenant-{tenant}")).unwrap();
            assert!(value < 16);
        }
    }
}
