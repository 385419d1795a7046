//! Collect stage: page through the catalog and save each collection record as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use eokg_common::IngestError;

use crate::catalog::{CatalogError, CatalogSource};
use crate::sources::metadata::CollectionRecord;

use super::{Stage, StageContext, StageError, StageId, StageReport};

pub struct CollectStage {
    catalog: Arc<dyn CatalogSource>,
}

impl CollectStage {
    pub fn new(catalog: Arc<dyn CatalogSource>) -> Self {
        Self { catalog }
    }
}

/// `<dir>/<archive center>/<doi with '/' as '_'>.json`
pub fn record_path(dir: &Path, record: &CollectionRecord) -> Option<PathBuf> {
    let name = record.doi().or_else(|| record.cmr_id.clone())?;
    let center = record.daac().unwrap_or_else(|| "Unknown".to_string());
    Some(dir.join(path_segment(&center)).join(format!("{}.json", path_segment(&name))))
}

/// One path component from catalog text. Separators become `_`, and so does a
/// component made only of dots, so nothing resolves outside `dir`.
fn path_segment(raw: &str) -> String {
    let segment = raw.replace(['/', '\\'], "_");
    if segment.is_empty() || segment.chars().all(|c| c == '.') {
        "_".repeat(segment.len().max(1))
    } else {
        segment
    }
}

fn save(path: &Path, record: &CollectionRecord) -> Result<bool, IngestError> {
    let origin = path.display().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::unavailable(&origin, e))?;
    }
    let existed = path.exists();
    let json = serde_json::to_string_pretty(record).map_err(|e| IngestError::unavailable(&origin, e))?;
    std::fs::write(path, json).map_err(|e| IngestError::unavailable(&origin, e))?;
    Ok(existed)
}

#[async_trait]
impl Stage for CollectStage {
    fn id(&self) -> StageId {
        StageId::Collect
    }

    /// Counts: `created` new files, `matched` overwritten files, `failed` catalog
    /// requests that errored, `unresolved` hits without a concept id.
    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let dir = &ctx.paths.dataset_metadata_dir;
        let mut report = StageReport::default();
        let mut connectivity_failures = 0u64;
        let mut cursor = None;

        loop {
            let page = self.catalog.fetch_page(cursor).await?;

            for failure in &page.failed {
                if failure.error.is_connectivity() {
                    connectivity_failures += 1;
                }
            }
            report.failed += page.failed.len() as u64;
            report.unresolved += page.missing_concept_id;

            for record in &page.records {
                let Some(path) = record_path(dir, record) else {
                    warn!(short_name = ?record.short_name, "Collection record has no DOI or concept id");
                    report.malformed += 1;
                    continue;
                };
                if save(&path, record)? {
                    report.matched += 1;
                } else {
                    report.created += 1;
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let saved = report.created + report.matched;
        if saved == 0 && report.failed > 0 && connectivity_failures == report.failed {
            return Err(CatalogError::Network(format!(
                "all {} catalog requests failed to connect",
                report.failed
            ))
            .into());
        }

        info!(
            dir = %dir.display(),
            saved,
            failed = report.failed,
            missing_concept_id = report.unresolved,
            "Collection metadata saved"
        );
        Ok(report)
    }
}
