//! Generic batch upsert: one executor for every node, edge and property-update type.
//!
//! Records are cut into contiguous chunks of `batch_size`. Each chunk is one
//! transaction; any error inside it rolls the whole chunk back, gets recorded
//! with its input offsets, and the next chunk proceeds.

use std::ops::Range;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use eokg_common::{EntityType, NormalizedKey, NormalizedRecord, RecordKey};

use crate::store::{FailureKind, GraphStore, StoreError, StoreTxn, WriteOutcome};

/// A chunk that was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// Zero-based chunk index within the call.
    pub batch: usize,
    /// Input offsets covered by the chunk, for replay.
    pub offsets: Range<usize>,
    pub kind: FailureKind,
    pub message: String,
}

/// Aggregate counts for one `upsert` call (or several, merged).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub created: u64,
    pub matched: u64,
    /// Records whose endpoint or target node does not exist. Nothing was written for them.
    pub unresolved: u64,
    /// Records in rolled-back chunks.
    pub failed: u64,
    /// Records in chunks never started because the run deadline passed.
    pub skipped: u64,
    pub batches_committed: usize,
    pub failures: Vec<BatchFailure>,
    pub skipped_batches: Vec<Range<usize>>,
    pub unresolved_offsets: Vec<usize>,
}

impl BatchResult {
    pub fn merge(&mut self, other: BatchResult) {
        self.created += other.created;
        self.matched += other.matched;
        self.unresolved += other.unresolved;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.batches_committed += other.batches_committed;
        self.failures.extend(other.failures);
        self.skipped_batches.extend(other.skipped_batches);
        self.unresolved_offsets.extend(other.unresolved_offsets);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Default)]
struct ChunkCounts {
    created: u64,
    matched: u64,
    unresolved: Vec<usize>,
}

pub struct BatchUpsertExecutor<'a> {
    store: &'a dyn GraphStore,
    batch_size: usize,
    deadline: Option<Instant>,
}

impl<'a> BatchUpsertExecutor<'a> {
    pub fn new(store: &'a dyn GraphStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            deadline: None,
        }
    }

    /// Chunks not yet started when `deadline` passes are skipped. In-flight chunks always finish.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Upsert `records` of one entity type.
    ///
    /// Only failing to declare the entity's constraints is an `Err`; every
    /// per-chunk problem is reported inside the `BatchResult`.
    pub async fn upsert(
        &self,
        entity: EntityType,
        records: &[NormalizedRecord],
    ) -> Result<BatchResult, StoreError> {
        self.ensure_schema(entity).await?;

        let mut result = BatchResult::default();
        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            let start = batch * self.batch_size;
            let offsets = start..start + chunk.len();

            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(%entity, batch, "Run deadline passed, skipping batch");
                result.skipped += chunk.len() as u64;
                result.skipped_batches.push(offsets);
                continue;
            }

            match self.run_chunk(entity, start, chunk).await {
                Ok(counts) => {
                    debug!(
                        %entity,
                        batch,
                        created = counts.created,
                        matched = counts.matched,
                        "Batch committed"
                    );
                    result.created += counts.created;
                    result.matched += counts.matched;
                    result.unresolved += counts.unresolved.len() as u64;
                    result.unresolved_offsets.extend(counts.unresolved);
                    result.batches_committed += 1;
                }
                Err(e) => {
                    warn!(
                        %entity,
                        batch,
                        offsets = ?offsets,
                        kind = ?e.kind(),
                        error = %e,
                        "Batch rolled back"
                    );
                    result.failed += chunk.len() as u64;
                    result.failures.push(BatchFailure {
                        batch,
                        offsets,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !result.skipped_batches.is_empty() {
            warn!(%entity, skipped = result.skipped, "Batches skipped after run deadline");
        }
        info!(
            %entity,
            created = result.created,
            matched = result.matched,
            unresolved = result.unresolved,
            failed = result.failed,
            "Upsert complete"
        );
        Ok(result)
    }

    async fn ensure_schema(&self, entity: EntityType) -> Result<(), StoreError> {
        if let EntityType::Node(kind) = entity {
            let d = kind.descriptor();
            for property in d.unique {
                self.store.ensure_unique_constraint(kind, property).await?;
            }
            for property in d.lookup {
                self.store.ensure_index(kind, property).await?;
            }
        }
        Ok(())
    }

    async fn run_chunk(
        &self,
        entity: EntityType,
        start: usize,
        chunk: &[NormalizedRecord],
    ) -> Result<ChunkCounts, StoreError> {
        let mut txn = self.store.begin().await?;
        match write_all(txn.as_mut(), entity, start, chunk).await {
            Ok(counts) => {
                txn.commit().await?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn write_all(
    txn: &mut dyn StoreTxn,
    entity: EntityType,
    start: usize,
    chunk: &[NormalizedRecord],
) -> Result<ChunkCounts, StoreError> {
    let mut counts = ChunkCounts::default();
    for (i, record) in chunk.iter().enumerate() {
        let offset = start + i;
        let outcome = match (entity, &record.key) {
            (EntityType::Node(kind), RecordKey::Node(key)) => {
                txn.upsert_node(kind, require(key, offset)?, &record.properties).await?
            }
            (EntityType::NodeProperties(kind), RecordKey::Node(key)) => {
                txn.set_properties(kind, require(key, offset)?, &record.properties).await?
            }
            (EntityType::Edge(kind), RecordKey::Edge { source, target }) => {
                txn.upsert_edge(
                    kind,
                    require(source, offset)?,
                    require(target, offset)?,
                    &record.properties,
                )
                .await?
            }
            _ => {
                return Err(StoreError::Malformed(format!(
                    "record {offset} does not fit {entity}"
                )))
            }
        };
        match outcome {
            WriteOutcome::Created => counts.created += 1,
            WriteOutcome::Matched => counts.matched += 1,
            WriteOutcome::Missing => counts.unresolved.push(offset),
        }
    }
    Ok(counts)
}

fn require(key: &NormalizedKey, offset: usize) -> Result<&str, StoreError> {
    key.as_str()
        .ok_or_else(|| StoreError::Malformed(format!("record {offset} has no identity key")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use eokg_common::{properties, EdgeKind, NodeKind, NodeRef, DOI, GLOBAL_ID};

    use super::*;
    use crate::MemoryStore;

    fn publication(i: usize) -> NormalizedRecord {
        let doi = format!("10.1/{i}");
        NormalizedRecord::node(eokg_common::global_id(&doi), properties([(DOI, doi)]))
    }

    #[tokio::test]
    async fn one_bad_record_fails_only_its_batch() {
        let store = MemoryStore::new();
        let mut records: Vec<_> = (0..250).map(publication).collect();
        records[119] = NormalizedRecord::keyless(properties([("title", "no id")]));

        let result = BatchUpsertExecutor::new(&store, 100)
            .upsert(EntityType::Node(NodeKind::Publication), &records)
            .await
            .unwrap();

        assert_eq!(result.batches_committed, 2);
        assert_eq!(result.created, 150);
        assert_eq!(result.failed, 100);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].offsets, 100..200);
        assert_eq!(result.failures[0].kind, FailureKind::Malformed);
        assert_eq!(store.count_nodes(NodeKind::Publication).await.unwrap(), 150);
    }

    #[tokio::test]
    async fn rerun_matches_everything() {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..30).map(publication).collect();
        let exec = BatchUpsertExecutor::new(&store, 7);

        let first = exec.upsert(EntityType::Node(NodeKind::Publication), &records).await.unwrap();
        let second = exec.upsert(EntityType::Node(NodeKind::Publication), &records).await.unwrap();

        assert_eq!(first.created, 30);
        assert_eq!(first.batches_committed, 5);
        assert_eq!(second.created, 0);
        assert_eq!(second.matched, 30);
        assert_eq!(store.total_nodes(), 30);
    }

    #[tokio::test]
    async fn duplicate_within_batch_is_one_node() {
        let store = MemoryStore::new();
        let records = vec![publication(1), publication(1)];
        let result = BatchUpsertExecutor::new(&store, 100)
            .upsert(EntityType::Node(NodeKind::Publication), &records)
            .await
            .unwrap();
        assert_eq!((result.created, result.matched), (1, 1));
        assert_eq!(store.total_nodes(), 1);
    }

    #[tokio::test]
    async fn constraints_are_declared_before_writing() {
        let store = MemoryStore::new();
        BatchUpsertExecutor::new(&store, 10)
            .upsert(EntityType::Node(NodeKind::Dataset), &[])
            .await
            .unwrap();
        assert!(store.has_unique_constraint(NodeKind::Dataset, GLOBAL_ID));
        assert!(store.has_unique_constraint(NodeKind::Dataset, DOI));
    }

    #[tokio::test]
    async fn edges_with_missing_endpoints_are_unresolved() {
        let store = MemoryStore::new();
        let exec = BatchUpsertExecutor::new(&store, 10);
        exec.upsert(EntityType::Node(NodeKind::Publication), &[publication(1), publication(2)])
            .await
            .unwrap();

        let a = eokg_common::global_id("10.1/1");
        let b = eokg_common::global_id("10.1/2");
        let edges = vec![
            NormalizedRecord::edge(a.clone(), b.clone()),
            NormalizedRecord::edge(a.clone(), "not-loaded"),
        ];
        let result = exec.upsert(EntityType::Edge(EdgeKind::Cites), &edges).await.unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(result.unresolved, 1);
        assert_eq!(result.unresolved_offsets, vec![1]);
        assert!(store.edge_exists(EdgeKind::Cites, &a, &b));
    }

    #[tokio::test]
    async fn property_updates_never_create_nodes() {
        let store = MemoryStore::new();
        let exec = BatchUpsertExecutor::new(&store, 10);
        exec.upsert(EntityType::Node(NodeKind::Publication), &[publication(1)])
            .await
            .unwrap();

        let gid = eokg_common::global_id("10.1/1");
        let updates = vec![
            NormalizedRecord::node(gid.clone(), properties([("pagerank", 0.25)])),
            NormalizedRecord::node("ghost", properties([("pagerank", 0.5)])),
        ];
        let result = exec
            .upsert(EntityType::NodeProperties(NodeKind::Publication), &updates)
            .await
            .unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(result.unresolved, 1);
        assert_eq!(store.total_nodes(), 1);
    }

    #[tokio::test]
    async fn passed_deadline_skips_pending_batches() {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..25).map(publication).collect();
        let deadline = Instant::now() - Duration::from_millis(1);
        let result = BatchUpsertExecutor::new(&store, 10)
            .with_deadline(Some(deadline))
            .upsert(EntityType::Node(NodeKind::Publication), &records)
            .await
            .unwrap();

        assert_eq!(result.skipped, 25);
        assert_eq!(result.skipped_batches, vec![0..10, 10..20, 20..25]);
        assert_eq!(store.total_nodes(), 0);
    }

    /// Fails every `begin` after the first `allowed`.
    struct FlakyStore {
        inner: MemoryStore,
        allowed: usize,
        begun: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn ensure_unique_constraint(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
            self.inner.ensure_unique_constraint(kind, property).await
        }
        async fn ensure_index(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
            self.inner.ensure_index(kind, property).await
        }
        async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
            if self.begun.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(StoreError::Connectivity("connection refused".into()));
            }
            self.inner.begin().await
        }
        async fn find_all_by_natural_key(
            &self,
            kind: NodeKind,
            property: &str,
            key: &NormalizedKey,
        ) -> Result<Vec<NodeRef>, StoreError> {
            self.inner.find_all_by_natural_key(kind, property, key).await
        }
        async fn lacks_property(&self, kind: NodeKind, global_id: &str, property: &str) -> Result<bool, StoreError> {
            self.inner.lacks_property(kind, global_id, property).await
        }
        async fn count_nodes(&self, kind: NodeKind) -> Result<u64, StoreError> {
            self.inner.count_nodes(kind).await
        }
        async fn count_edges(&self, kind: EdgeKind) -> Result<u64, StoreError> {
            self.inner.count_edges(kind).await
        }
    }

    #[tokio::test]
    async fn connectivity_loss_is_reported_per_batch() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            allowed: 1,
            begun: AtomicUsize::new(0),
        };
        let records: Vec<_> = (0..20).map(publication).collect();
        let result = BatchUpsertExecutor::new(&store, 10)
            .upsert(EntityType::Node(NodeKind::Publication), &records)
            .await
            .unwrap();

        assert_eq!(result.created, 10);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, FailureKind::Connectivity);
        assert_eq!(store.inner.total_nodes(), 10);
    }

    #[tokio::test]
    async fn edge_key_on_node_entity_is_malformed() {
        let store = MemoryStore::new();
        let result = BatchUpsertExecutor::new(&store, 10)
            .upsert(
                EntityType::Node(NodeKind::Project),
                &[NormalizedRecord::edge("a", "b")],
            )
            .await
            .unwrap();
        assert_eq!(result.failures[0].kind, FailureKind::Malformed);
        assert_eq!(store.total_nodes(), 0);
    }
}
