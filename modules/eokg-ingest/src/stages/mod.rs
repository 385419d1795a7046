//! Pipeline stages. Each stage is a function of (its input source, the store,
//! the settings) that reports what it wrote.

pub mod collect;
pub mod compute;
pub mod edges;
pub mod nodes;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use eokg_common::{IngestError, IngestSettings, PathsConfig};
use eokg_graph::{BatchFailure, BatchResult, BatchUpsertExecutor, FailureKind, GraphAnalytics, GraphStore, StoreError};

use crate::catalog::{CatalogError, CatalogSource};
use crate::classify::ResearchAreaClassifier;

// ---------------------------------------------------------------------------
// Stage identity and dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Collect,
    DatasetNodes,
    DataCenterNodes,
    ProjectNodes,
    PlatformNodes,
    InstrumentNodes,
    PublicationNodes,
    KeywordNodes,
    DataCenterDataset,
    DatasetProject,
    DatasetPlatform,
    PlatformInstrument,
    PublicationDataset,
    DatasetKeyword,
    PublicationCitations,
    PublicationResearchArea,
    PageRank,
    FastRp,
}

impl StageId {
    pub const ALL: [StageId; 18] = [
        StageId::Collect,
        StageId::DatasetNodes,
        StageId::DataCenterNodes,
        StageId::ProjectNodes,
        StageId::PlatformNodes,
        StageId::InstrumentNodes,
        StageId::PublicationNodes,
        StageId::KeywordNodes,
        StageId::DataCenterDataset,
        StageId::DatasetProject,
        StageId::DatasetPlatform,
        StageId::PlatformInstrument,
        StageId::PublicationDataset,
        StageId::DatasetKeyword,
        StageId::PublicationCitations,
        StageId::PublicationResearchArea,
        StageId::PageRank,
        StageId::FastRp,
    ];

    /// Name used in config `[stages]` tables and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Collect => "collect",
            StageId::DatasetNodes => "dataset_nodes",
            StageId::DataCenterNodes => "data_center_nodes",
            StageId::ProjectNodes => "project_nodes",
            StageId::PlatformNodes => "platform_nodes",
            StageId::InstrumentNodes => "instrument_nodes",
            StageId::PublicationNodes => "publication_nodes",
            StageId::KeywordNodes => "keyword_nodes",
            StageId::DataCenterDataset => "data_center_dataset",
            StageId::DatasetProject => "dataset_project",
            StageId::DatasetPlatform => "dataset_platform",
            StageId::PlatformInstrument => "platform_instrument",
            StageId::PublicationDataset => "publication_dataset",
            StageId::DatasetKeyword => "dataset_keyword",
            StageId::PublicationCitations => "publication_citations",
            StageId::PublicationResearchArea => "publication_research_area",
            StageId::PageRank => "page_rank",
            StageId::FastRp => "fast_rp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Stages that must reach success or partial success first.
    pub fn deps(&self) -> &'static [StageId] {
        use StageId::*;
        match self {
            Collect | PublicationNodes | KeywordNodes => &[],
            DatasetNodes | DataCenterNodes | ProjectNodes | PlatformNodes | InstrumentNodes => &[Collect],
            DataCenterDataset => &[DataCenterNodes, DatasetNodes],
            DatasetProject => &[DatasetNodes, ProjectNodes],
            DatasetPlatform => &[DatasetNodes, PlatformNodes],
            PlatformInstrument => &[PlatformNodes, InstrumentNodes],
            PublicationDataset => &[PublicationNodes, DatasetNodes],
            DatasetKeyword => &[DatasetNodes, KeywordNodes],
            PublicationCitations => &[PublicationNodes],
            PublicationResearchArea => &[PublicationNodes, KeywordNodes],
            PageRank => &[PublicationNodes, DatasetNodes, PublicationDataset, PublicationCitations],
            FastRp => &[
                DataCenterDataset,
                DatasetProject,
                DatasetPlatform,
                PlatformInstrument,
                PublicationDataset,
                DatasetKeyword,
                PublicationCitations,
                PublicationResearchArea,
            ],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Reports and errors
// ---------------------------------------------------------------------------

/// What one stage wrote.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub created: u64,
    pub matched: u64,
    pub failed: u64,
    pub unresolved: u64,
    /// Records in batches abandoned after the run deadline.
    pub skipped: u64,
    /// Source records that could not be used (parse errors, missing keys, rejected rows).
    pub malformed: u64,
    pub batches_committed: usize,
    pub failures: Vec<BatchFailure>,
}

impl StageReport {
    pub fn absorb(&mut self, result: BatchResult) {
        self.created += result.created;
        self.matched += result.matched;
        self.failed += result.failed;
        self.unresolved += result.unresolved;
        self.skipped += result.skipped;
        self.batches_committed += result.batches_committed;
        self.failures.extend(result.failures);
    }

    /// Every failure was a lost connection and nothing was committed.
    pub fn connectivity_lost(&self) -> bool {
        self.batches_committed == 0
            && !self.failures.is_empty()
            && self.failures.iter().all(|f| f.kind == FailureKind::Connectivity)
    }
}

impl From<BatchResult> for StageReport {
    fn from(result: BatchResult) -> Self {
        let mut report = StageReport::default();
        report.absorb(result);
        report
    }
}

/// A stage that could not run at all. Batch-level problems are reported, not raised.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Source(#[from] IngestError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Analytics error: {0}")]
    Analytics(String),
}

// ---------------------------------------------------------------------------
// Stage trait and context
// ---------------------------------------------------------------------------

/// Everything a stage reads besides its own collaborator.
pub struct StageContext {
    pub store: Arc<dyn GraphStore>,
    pub settings: IngestSettings,
    pub paths: PathsConfig,
    /// Batches not started by this instant are skipped.
    pub deadline: Option<Instant>,
}

impl StageContext {
    pub fn new(store: Arc<dyn GraphStore>, settings: IngestSettings, paths: PathsConfig) -> Self {
        Self {
            store,
            settings,
            paths,
            deadline: None,
        }
    }

    pub fn executor(&self) -> BatchUpsertExecutor<'_> {
        BatchUpsertExecutor::new(self.store.as_ref(), self.settings.batch_size).with_deadline(self.deadline)
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError>;
}

/// Collaborators the stages are built from.
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub classifier: Arc<dyn ResearchAreaClassifier>,
    /// Without an analytics engine the compute stages are left out.
    pub analytics: Option<Arc<dyn GraphAnalytics>>,
}

/// Every stage of the ingest pipeline.
pub fn pipeline(collaborators: Collaborators) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(collect::CollectStage::new(collaborators.catalog))];
    stages.extend(nodes::node_stages());
    stages.extend(edges::edge_stages(collaborators.classifier));
    if let Some(analytics) = collaborators.analytics {
        stages.push(Box::new(compute::PageRankStage::new(analytics.clone())));
        stages.push(Box::new(compute::FastRpStage::new(analytics)));
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for id in StageId::ALL {
            assert_eq!(StageId::from_name(id.name()), Some(id));
        }
        assert_eq!(StageId::from_name("reap"), None);
    }

    #[test]
    fn dependencies_point_backwards() {
        for id in StageId::ALL {
            for dep in id.deps() {
                assert!(dep < &id, "{id} depends on later stage {dep}");
            }
        }
    }

    #[test]
    fn file_driven_stages_do_not_wait_for_collect() {
        assert!(StageId::PublicationNodes.deps().is_empty());
        assert!(StageId::KeywordNodes.deps().is_empty());
        assert_eq!(StageId::DatasetNodes.deps(), &[StageId::Collect]);
    }

    #[test]
    fn connectivity_lost_needs_no_commits() {
        let failure = BatchFailure {
            batch: 0,
            offsets: 0..10,
            kind: FailureKind::Connectivity,
            message: "connection refused".into(),
        };
        let mut report = StageReport {
            failures: vec![failure],
            ..Default::default()
        };
        assert!(report.connectivity_lost());

        report.batches_committed = 1;
        assert!(!report.connectivity_lost());
    }
}
