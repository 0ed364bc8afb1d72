use super::store::DerivationStore;

use tably_core::Result;

/// One side of a many-to-many link change: attach or detach `ids` of
/// `table_to` rows on the `table_from` row `guid`.
///
/// Both sides of the relation carry a mirrored `<other>_ids` array
/// column, so every change is applied symmetrically.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkUpdate {
    pub table_from: String,
    pub table_to: String,
    pub guid: String,
    pub ids: Vec<String>,
}

fn link_field(other_table: &str) -> String {
    format!("{other_table}_ids")
}

fn union(current: Vec<String>, additions: &[String]) -> Vec<String> {
    let mut merged = current;
    for id in additions {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged
}

fn difference(current: Vec<String>, removals: &[String]) -> Vec<String> {
    current
        .into_iter()
        .filter(|id| !removals.iter().any(|r| r == id))
        .collect()
}

/// Attaches links on both sides. Idempotent: ids already present are
/// left alone, so replaying an update cannot duplicate links.
pub async fn append<S: DerivationStore + ?Sized>(store: &S, update: &LinkUpdate) -> Result<()> {
    if update.ids.is_empty() {
        return Ok(());
    }

    let forward = link_field(&update.table_to);
    let current = store
        .linked_ids(&update.table_from, &forward, &update.guid)
        .await?;
    let merged = union(current, &update.ids);
    store
        .store_linked_ids(&update.table_from, &forward, &update.guid, &merged)
        .await?;

    let reverse = link_field(&update.table_from);
    let own = std::slice::from_ref(&update.guid);
    for id in &update.ids {
        let current = store.linked_ids(&update.table_to, &reverse, id).await?;
        let merged = union(current, own);
        store
            .store_linked_ids(&update.table_to, &reverse, id, &merged)
            .await?;
    }

    Ok(())
}

/// Detaches links on both sides. Ids not present are ignored.
pub async fn remove<S: DerivationStore + ?Sized>(store: &S, update: &LinkUpdate) -> Result<()> {
    if update.ids.is_empty() {
        return Ok(());
    }

    let forward = link_field(&update.table_to);
    let current = store
        .linked_ids(&update.table_from, &forward, &update.guid)
        .await?;
    let remaining = difference(current, &update.ids);
    store
        .store_linked_ids(&update.table_from, &forward, &update.guid, &remaining)
        .await?;

    let reverse = link_field(&update.table_from);
    let own = std::slice::from_ref(&update.guid);
    for id in &update.ids {
        let current = store.linked_ids(&update.table_to, &reverse, id).await?;
        let remaining = difference(current, own);
        store
            .store_linked_ids(&update.table_to, &reverse, id, &remaining)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;
    use pretty_assertions::assert_eq;

    fn update(ids: &[&str]) -> LinkUpdate {
        LinkUpdate {
            table_from: "orders".into(),
            table_to: "courier".into(),
            guid: "o-1".into(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn append_links_both_sides() {
        let store = MemoryStore::default();

        append(&store, &update(&["c-1", "c-2"])).await.unwrap();

        assert_eq!(
            store.links("orders", "courier_ids", "o-1"),
            vec!["c-1", "c-2"]
        );
        assert_eq!(store.links("courier", "orders_ids", "c-1"), vec!["o-1"]);
        assert_eq!(store.links("courier", "orders_ids", "c-2"), vec!["o-1"]);
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = MemoryStore::default();

        append(&store, &update(&["c-1"])).await.unwrap();
        append(&store, &update(&["c-1"])).await.unwrap();

        assert_eq!(store.links("orders", "courier_ids", "o-1"), vec!["c-1"]);
        assert_eq!(store.links("courier", "orders_ids", "c-1"), vec!["o-1"]);
    }

    #[tokio::test]
    async fn remove_detaches_both_sides_and_ignores_missing() {
        let store = MemoryStore::default();

        append(&store, &update(&["c-1", "c-2"])).await.unwrap();
        remove(&store, &update(&["c-1", "c-404"])).await.unwrap();

        assert_eq!(store.links("orders", "courier_ids", "o-1"), vec!["c-2"]);
        assert!(store.links("courier", "orders_ids", "c-1").is_empty());
        assert_eq!(store.links("courier", "orders_ids", "c-2"), vec!["o-1"]);
    }
}
