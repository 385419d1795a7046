//! Store interface shared by the Neo4j and in-memory backends.
//!
//! Writes happen inside a `StoreTxn` the caller opens and closes; reads and
//! schema declarations run on their own.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use eokg_common::{EdgeKind, NodeKind, NodeRef, NormalizedKey, Properties};

/// Failure classes a batch can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A write conflicted with a uniqueness constraint.
    Constraint,
    /// The store could not be reached.
    Connectivity,
    /// The record or statement was rejected as invalid.
    Malformed,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::ConstraintViolation(_) => FailureKind::Constraint,
            StoreError::Connectivity(_) => FailureKind::Connectivity,
            StoreError::Malformed(_) | StoreError::Query(_) => FailureKind::Malformed,
        }
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("constraintvalidationfailed") || lower.contains("already exists with label") {
            StoreError::ConstraintViolation(msg)
        } else if lower.contains("connection")
            || lower.contains("io error")
            || lower.contains("broken pipe")
            || lower.contains("timed out")
            || lower.contains("unavailable")
        {
            StoreError::Connectivity(msg)
        } else {
            StoreError::Query(msg)
        }
    }
}

/// Result of a single conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing matched the key; the entity was created.
    Created,
    /// An existing entity matched; properties were updated in place.
    Matched,
    /// A node the write depends on does not exist. Nothing was written.
    Missing,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Declare a uniqueness constraint. Idempotent.
    async fn ensure_unique_constraint(&self, kind: NodeKind, property: &str) -> Result<(), StoreError>;

    /// Declare a lookup index. Idempotent.
    async fn ensure_index(&self, kind: NodeKind, property: &str) -> Result<(), StoreError>;

    /// Open a write transaction. It holds one pooled connection until commit or rollback.
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;

    /// Every node whose `property` equals the normalized key, in `globalId` order.
    async fn find_all_by_natural_key(
        &self,
        kind: NodeKind,
        property: &str,
        key: &NormalizedKey,
    ) -> Result<Vec<NodeRef>, StoreError>;

    /// The node with the lowest `globalId` whose `property` equals the normalized key.
    /// For properties under a uniqueness constraint this is the only match.
    async fn find_by_natural_key(
        &self,
        kind: NodeKind,
        property: &str,
        key: &NormalizedKey,
    ) -> Result<Option<NodeRef>, StoreError> {
        Ok(self.find_all_by_natural_key(kind, property, key).await?.into_iter().next())
    }

    /// True when the node exists and has no value for `property`.
    async fn lacks_property(&self, kind: NodeKind, global_id: &str, property: &str) -> Result<bool, StoreError>;

    async fn count_nodes(&self, kind: NodeKind) -> Result<u64, StoreError>;

    async fn count_edges(&self, kind: EdgeKind) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait StoreTxn: Send {
    /// Create the node if no node of this kind has `globalId`, else update it.
    /// Null properties are skipped, never written.
    async fn upsert_node(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError>;

    /// Create the relationship once per (source, type, target). `Missing` if an endpoint is absent.
    async fn upsert_edge(
        &mut self,
        kind: EdgeKind,
        source: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError>;

    /// Set properties on an existing node. `Missing` if it does not exist.
    async fn set_properties(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
