//! In-process graph store. Backs `--dry-run` and the test suites.
//!
//! A transaction works on a private copy of the graph taken at `begin` and
//! publishes it on commit, so a rolled-back batch leaves nothing behind.
//! Batches run one at a time, which is the only way the executor uses it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use eokg_common::{EdgeKind, NodeKind, NodeRef, NormalizedKey, PropValue, Properties, GLOBAL_ID};

use crate::store::{GraphStore, StoreError, StoreTxn, WriteOutcome};

#[derive(Debug, Clone, Default)]
struct MemoryGraph {
    nodes: BTreeMap<(NodeKind, String), Properties>,
    edges: BTreeMap<(EdgeKind, String, String), Properties>,
    unique: BTreeSet<(NodeKind, String)>,
    indexes: BTreeSet<(NodeKind, String)>,
}

impl MemoryGraph {
    fn check_unique(
        &self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<(), StoreError> {
        for (constrained_kind, property) in &self.unique {
            if *constrained_kind != kind || property == GLOBAL_ID {
                continue;
            }
            let Some(value) = properties.get(property).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = self.nodes.iter().find(|((k, gid), props)| {
                *k == kind && gid != global_id && props.get(property) == Some(value)
            });
            if let Some(((_, other), _)) = clash {
                return Err(StoreError::ConstraintViolation(format!(
                    "{kind} {global_id}: {property} already held by {other}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryGraph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryGraph>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Connectivity("memory store lock poisoned".into()))
    }

    /// Committed properties of a node, if it exists.
    pub fn node(&self, kind: NodeKind, global_id: &str) -> Option<Properties> {
        let graph = self.lock().ok()?;
        graph.nodes.get(&(kind, global_id.to_string())).cloned()
    }

    pub fn edge_exists(&self, kind: EdgeKind, source: &str, target: &str) -> bool {
        self.lock()
            .map(|g| g.edges.contains_key(&(kind, source.to_string(), target.to_string())))
            .unwrap_or(false)
    }

    /// All committed nodes of a kind, ordered by `globalId`.
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<(String, Properties)> {
        self.lock()
            .map(|g| {
                g.nodes
                    .iter()
                    .filter(|((k, _), _)| *k == kind)
                    .map(|((_, gid), props)| (gid.clone(), props.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All committed edges of a kind as (source, target) pairs.
    pub fn edges_of(&self, kind: EdgeKind) -> Vec<(String, String)> {
        self.lock()
            .map(|g| {
                g.edges
                    .keys()
                    .filter(|(k, _, _)| *k == kind)
                    .map(|(_, s, t)| (s.clone(), t.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_nodes(&self) -> usize {
        self.lock().map(|g| g.nodes.len()).unwrap_or(0)
    }

    pub fn total_edges(&self) -> usize {
        self.lock().map(|g| g.edges.len()).unwrap_or(0)
    }

    pub fn has_unique_constraint(&self, kind: NodeKind, property: &str) -> bool {
        self.lock()
            .map(|g| g.unique.contains(&(kind, property.to_string())))
            .unwrap_or(false)
    }

    pub fn has_index(&self, kind: NodeKind, property: &str) -> bool {
        self.lock()
            .map(|g| g.indexes.contains(&(kind, property.to_string())))
            .unwrap_or(false)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn ensure_unique_constraint(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
        self.lock()?.unique.insert((kind, property.to_string()));
        Ok(())
    }

    async fn ensure_index(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
        self.lock()?.indexes.insert((kind, property.to_string()));
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let working = self.lock()?.clone();
        Ok(Box::new(MemoryTxn {
            shared: Arc::clone(&self.state),
            working,
        }))
    }

    async fn find_all_by_natural_key(
        &self,
        kind: NodeKind,
        property: &str,
        key: &NormalizedKey,
    ) -> Result<Vec<NodeRef>, StoreError> {
        let Some(key) = key.as_str() else {
            return Ok(Vec::new());
        };
        let graph = self.lock()?;
        // BTreeMap iteration is already in globalId order within a kind.
        Ok(graph
            .nodes
            .iter()
            .filter(|((k, _), props)| *k == kind && props.get(property).and_then(PropValue::as_text) == Some(key))
            .map(|((_, gid), _)| NodeRef {
                kind,
                global_id: gid.clone(),
            })
            .collect())
    }

    async fn lacks_property(&self, kind: NodeKind, global_id: &str, property: &str) -> Result<bool, StoreError> {
        let graph = self.lock()?;
        Ok(graph
            .nodes
            .get(&(kind, global_id.to_string()))
            .is_some_and(|props| props.get(property).map_or(true, PropValue::is_null)))
    }

    async fn count_nodes(&self, kind: NodeKind) -> Result<u64, StoreError> {
        Ok(self.lock()?.nodes.keys().filter(|(k, _)| *k == kind).count() as u64)
    }

    async fn count_edges(&self, kind: EdgeKind) -> Result<u64, StoreError> {
        Ok(self.lock()?.edges.keys().filter(|(k, _, _)| *k == kind).count() as u64)
    }
}

struct MemoryTxn {
    shared: Arc<Mutex<MemoryGraph>>,
    working: MemoryGraph,
}

fn apply(target: &mut Properties, properties: &Properties) {
    for (name, value) in properties {
        if !value.is_null() {
            target.insert(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn upsert_node(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        self.working.check_unique(kind, global_id, properties)?;
        let key = (kind, global_id.to_string());
        let outcome = if self.working.nodes.contains_key(&key) {
            WriteOutcome::Matched
        } else {
            WriteOutcome::Created
        };
        let node = self.working.nodes.entry(key).or_default();
        node.insert(GLOBAL_ID.to_string(), PropValue::Text(global_id.to_string()));
        apply(node, properties);
        Ok(outcome)
    }

    async fn upsert_edge(
        &mut self,
        kind: EdgeKind,
        source: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        let d = kind.descriptor();
        let has = |k: NodeKind, gid: &str| self.working.nodes.contains_key(&(k, gid.to_string()));
        if !has(d.source, source) || !has(d.target, target) {
            return Ok(WriteOutcome::Missing);
        }
        let key = (kind, source.to_string(), target.to_string());
        let outcome = if self.working.edges.contains_key(&key) {
            WriteOutcome::Matched
        } else {
            WriteOutcome::Created
        };
        apply(self.working.edges.entry(key).or_default(), properties);
        Ok(outcome)
    }

    async fn set_properties(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        self.working.check_unique(kind, global_id, properties)?;
        match self.working.nodes.get_mut(&(kind, global_id.to_string())) {
            Some(node) => {
                apply(node, properties);
                Ok(WriteOutcome::Matched)
            }
            None => Ok(WriteOutcome::Missing),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| StoreError::Connectivity("memory store lock poisoned".into()))?;
        *shared = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eokg_common::{properties, DOI, SHORT_NAME_KEY};

    #[tokio::test]
    async fn second_upsert_matches_instead_of_creating() {
        let store = MemoryStore::new();
        let props = properties([("title", "A")]);

        let mut txn = store.begin().await.unwrap();
        assert_eq!(txn.upsert_node(NodeKind::Publication, "p1", &props).await.unwrap(), WriteOutcome::Created);
        assert_eq!(txn.upsert_node(NodeKind::Publication, "p1", &props).await.unwrap(), WriteOutcome::Matched);
        txn.commit().await.unwrap();

        assert_eq!(store.count_nodes(NodeKind::Publication).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn null_properties_never_overwrite() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Publication, "p1", &properties([("title", "Kept")]))
            .await
            .unwrap();
        txn.upsert_node(
            NodeKind::Publication,
            "p1",
            &properties([("title", PropValue::Null)]),
        )
        .await
        .unwrap();
        txn.commit().await.unwrap();

        let node = store.node(NodeKind::Publication, "p1").unwrap();
        assert_eq!(node["title"], PropValue::from("Kept"));
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Dataset, "d1", &Properties::new()).await.unwrap();
        txn.rollback().await.unwrap();
        assert_eq!(store.total_nodes(), 0);
    }

    #[tokio::test]
    async fn unique_constraint_rejects_second_holder() {
        let store = MemoryStore::new();
        store.ensure_unique_constraint(NodeKind::Publication, DOI).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Publication, "p1", &properties([(DOI, "10.1/a")]))
            .await
            .unwrap();
        let err = txn
            .upsert_node(NodeKind::Publication, "p2", &properties([(DOI, "10.1/a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn edge_to_missing_node_is_reported_not_created() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Publication, "p1", &Properties::new()).await.unwrap();
        let outcome = txn
            .upsert_edge(EdgeKind::Cites, "p1", "nope", &Properties::new())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Missing);
        txn.commit().await.unwrap();
        assert_eq!(store.total_edges(), 0);
    }

    #[tokio::test]
    async fn natural_key_lookup_ignores_other_kinds() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Dataset, "d1", &properties([(DOI, "10.1/x")])).await.unwrap();
        txn.upsert_node(NodeKind::Publication, "p1", &properties([(DOI, "10.1/x")])).await.unwrap();
        txn.commit().await.unwrap();

        let key = eokg_common::normalize("10.1/X");
        let found = store
            .find_by_natural_key(NodeKind::Publication, DOI, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.global_id, "p1");
        assert!(store
            .find_by_natural_key(NodeKind::Publication, DOI, &NormalizedKey::Absent)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn shared_short_name_returns_every_dataset() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        for (gid, doi) in [("d61", "10.1/v61"), ("d60", "10.1/v60")] {
            let props = properties([(DOI, doi), (SHORT_NAME_KEY, "mod08_m3")]);
            txn.upsert_node(NodeKind::Dataset, gid, &props).await.unwrap();
        }
        txn.upsert_node(NodeKind::Dataset, "other", &properties([(SHORT_NAME_KEY, "airx3")]))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let key = eokg_common::normalize("MOD08_M3");
        let all = store
            .find_all_by_natural_key(NodeKind::Dataset, SHORT_NAME_KEY, &key)
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|n| n.global_id.as_str()).collect();
        assert_eq!(ids, vec!["d60", "d61"]);

        let first = store.find_by_natural_key(NodeKind::Dataset, SHORT_NAME_KEY, &key).await.unwrap();
        assert_eq!(first.unwrap().global_id, "d60");
    }

    #[tokio::test]
    async fn lacks_property_needs_an_existing_node() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_node(NodeKind::Dataset, "bare", &properties([(SHORT_NAME_KEY, "airx3")]))
            .await
            .unwrap();
        txn.upsert_node(NodeKind::Dataset, "with-doi", &properties([(DOI, "10.1/a")]))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert!(store.lacks_property(NodeKind::Dataset, "bare", DOI).await.unwrap());
        assert!(!store.lacks_property(NodeKind::Dataset, "with-doi", DOI).await.unwrap());
        assert!(!store.lacks_property(NodeKind::Dataset, "absent", DOI).await.unwrap());
    }
}
