pub mod catalog;
pub mod citation;
pub mod classify;
pub mod hierarchy;
pub mod orchestrator;
pub mod sources;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use catalog::{CatalogError, CatalogPage, CatalogSource, CmrCatalog};
pub use citation::{CitationResolution, CitationResolver};
pub use classify::{LexiconClassifier, ResearchAreaClassifier};
pub use hierarchy::{Hierarchy, HierarchyBuilder};
pub use orchestrator::{Orchestrator, OrchestratorError, RunSummary, StageStatus};
pub use stages::{pipeline, Collaborators, Stage, StageContext, StageError, StageId, StageReport};
