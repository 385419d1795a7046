// Test doubles for the ingest pipeline.
//
// - FakeCatalog (CatalogSource): serves a fixed record list in pages
// - FakeAnalytics (GraphAnalytics): returns preset scores, records projections
//
// Plus fixture builders for UMM collection records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use eokg_common::NodeRef;
use eokg_graph::{GraphAnalytics, Projection, StoreError};

use crate::catalog::{CatalogError, CatalogPage, CatalogSource, FailedFetch};
use crate::sources::metadata::CollectionRecord;

// ---------------------------------------------------------------------------
// FakeCatalog
// ---------------------------------------------------------------------------

pub struct FakeCatalog {
    records: Vec<CollectionRecord>,
    page_size: usize,
    unreachable: Vec<String>,
    served: AtomicUsize,
}

impl FakeCatalog {
    pub fn paged(records: Vec<CollectionRecord>, page_size: usize) -> Self {
        Self {
            records,
            page_size: page_size.max(1),
            unreachable: Vec::new(),
            served: AtomicUsize::new(0),
        }
    }

    /// Every DOI fails with a network error.
    pub fn unreachable(dois: &[&str]) -> Self {
        Self {
            unreachable: dois.iter().map(|d| d.to_string()).collect(),
            ..Self::paged(Vec::new(), 10)
        }
    }

    pub fn pages_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_page(&self, cursor: Option<String>) -> Result<CatalogPage, CatalogError> {
        self.served.fetch_add(1, Ordering::SeqCst);
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| CatalogError::Parse(format!("invalid cursor {c:?}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(self.records.len());

        let failed = if start == 0 {
            self.unreachable
                .iter()
                .map(|doi| FailedFetch {
                    doi: doi.clone(),
                    error: CatalogError::Network("connection refused".into()),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(CatalogPage {
            records: self.records.get(start..end).unwrap_or_default().to_vec(),
            next: (end < self.records.len()).then(|| end.to_string()),
            failed,
            missing_concept_id: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeAnalytics
// ---------------------------------------------------------------------------

/// Scores are preset per node. Embeddings repeat the node's score `dimensions` times.
#[derive(Default)]
pub struct FakeAnalytics {
    scores: HashMap<NodeRef, f64>,
    fail: bool,
    projections: Mutex<Vec<String>>,
}

impl FakeAnalytics {
    pub fn with_score(mut self, node: NodeRef, score: f64) -> Self {
        self.scores.insert(node, score);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Names of the projections requested so far.
    pub fn projections(&self) -> Vec<String> {
        self.projections.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, projection: &Projection) -> Result<(), StoreError> {
        if let Ok(mut seen) = self.projections.lock() {
            seen.push(projection.name.clone());
        }
        if self.fail {
            return Err(StoreError::Connectivity("analytics engine unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphAnalytics for FakeAnalytics {
    async fn page_rank(&self, projection: &Projection) -> Result<HashMap<NodeRef, f64>, StoreError> {
        self.record(projection)?;
        Ok(self.scores.clone())
    }

    async fn embedding(
        &self,
        projection: &Projection,
        dimensions: usize,
    ) -> Result<HashMap<NodeRef, Vec<f64>>, StoreError> {
        self.record(projection)?;
        Ok(self
            .scores
            .iter()
            .map(|(node, score)| (node.clone(), vec![*score; dimensions]))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// UMM-C JSON for one collection. `platforms` pairs a platform short name with its instruments.
pub fn collection_json(doi: &str, short_name: &str, centers: &[&str], platforms: &[(&str, &[&str])]) -> String {
    let centers: Vec<_> = centers
        .iter()
        .map(|c| {
            json!({
                "Roles": ["ARCHIVER"],
                "ShortName": c,
                "LongName": format!("{c} Data Center"),
                "ContactInformation": {"RelatedUrls": [{"URL": format!("https://{}.example", c.to_lowercase())}]}
            })
        })
        .collect();
    let platforms: Vec<_> = platforms
        .iter()
        .map(|(p, instruments)| {
            json!({
                "Type": "Earth Observation Satellites",
                "ShortName": p,
                "Instruments": instruments.iter().map(|i| json!({"ShortName": i})).collect::<Vec<_>>()
            })
        })
        .collect();

    json!({
        "DOI": {"DOI": doi},
        "ShortName": short_name,
        "EntryTitle": format!("{short_name} Daily L3 Global"),
        "Abstract": format!("Daily global product {short_name}.\nVersion 6."),
        "CMR_ID": format!("C-{short_name}"),
        "DataCenters": centers,
        "TemporalExtents": [{"RangeDateTimes": [{"BeginningDateTime": "2000-02-24T00:00:00.000Z"}]}],
        "Projects": [{"ShortName": "EOS", "LongName": "Earth Observing System"}],
        "Platforms": platforms
    })
    .to_string()
}

pub fn collection_record(doi: &str, short_name: &str, centers: &[&str]) -> CollectionRecord {
    serde_json::from_str(&collection_json(doi, short_name, centers, &[])).unwrap_or_default()
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
