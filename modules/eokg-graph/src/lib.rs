pub mod analytics;
pub mod client;
pub mod executor;
pub mod memory;
pub mod migrate;
pub mod neo4j_store;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use analytics::{GdsAnalytics, GraphAnalytics, Projection};
pub use client::GraphClient;
pub use executor::{BatchFailure, BatchResult, BatchUpsertExecutor};
pub use memory::MemoryStore;
pub use neo4j_store::Neo4jStore;
pub use neo4rs::query;
pub use store::{FailureKind, GraphStore, StoreError, StoreTxn, WriteOutcome};
