//! Remote metadata catalog. The Collect stage pages through a `CatalogSource`
//! until it reports no next cursor.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use eokg_common::IngestError;

use crate::sources::dois::read_source_dois;
use crate::sources::metadata::CollectionRecord;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Source(#[from] IngestError),
}

impl CatalogError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CatalogError::Network(_))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

/// A catalog lookup that failed. The rest of the page is unaffected.
#[derive(Debug)]
pub struct FailedFetch {
    pub doi: String,
    pub error: CatalogError,
}

#[derive(Debug, Default)]
pub struct CatalogPage {
    pub records: Vec<CollectionRecord>,
    /// Cursor for the following page; `None` when done.
    pub next: Option<String>,
    pub failed: Vec<FailedFetch>,
    /// Hits that came back without a concept id. Skipped.
    pub missing_concept_id: u64,
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page. `None` starts from the beginning.
    async fn fetch_page(&self, cursor: Option<String>) -> Result<CatalogPage, CatalogError>;
}

// ---------------------------------------------------------------------------
// CMR
// ---------------------------------------------------------------------------

/// NASA Common Metadata Repository, queried one DOI at a time.
/// The cursor is an offset into the DOI list, which is read on the first fetch.
pub struct CmrCatalog {
    client: reqwest::Client,
    base_url: String,
    source: PathBuf,
    dois: OnceCell<Vec<String>>,
    page_size: usize,
}

impl CmrCatalog {
    /// Catalog over the `DOI_NAME` column of the CSV at `source`.
    pub fn new(base_url: impl Into<String>, source: PathBuf, page_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            source,
            dois: OnceCell::new(),
            page_size: page_size.max(1),
        }
    }

    /// Catalog over a fixed DOI list.
    pub fn with_dois(base_url: impl Into<String>, dois: Vec<String>, page_size: usize) -> Self {
        Self {
            dois: OnceCell::from(dois),
            ..Self::new(base_url, PathBuf::new(), page_size)
        }
    }

    async fn dois(&self) -> Result<&[String], CatalogError> {
        let dois = self
            .dois
            .get_or_try_init(|| async {
                let loaded = read_source_dois(&self.source)?;
                info!(dois = loaded.items.len(), skipped = loaded.skipped_count(), "Source DOI list read");
                Ok::<_, IngestError>(loaded.items)
            })
            .await?;
        Ok(dois.as_slice())
    }

    fn url(&self, doi: &str) -> String {
        format!(
            "{}/search/collections.umm_json?doi={}",
            self.base_url,
            urlencoding::encode(doi)
        )
    }

    /// `Ok(None)` when the catalog has no usable hit for this DOI.
    async fn fetch_one(&self, doi: &str) -> Result<Option<CollectionRecord>, CatalogError> {
        let resp = self.client.get(self.url(doi)).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: Value = serde_json::from_str(&resp.text().await?)?;
        parse_hit(&body)
    }
}

/// Record from the first hit of a CMR `umm_json` response, with `CMR_ID` and
/// `Frequency` filled in. `None` when there is no hit or no concept id.
fn parse_hit(body: &Value) -> Result<Option<CollectionRecord>, CatalogError> {
    let Some(item) = body.get("items").and_then(|items| items.get(0)) else {
        return Ok(None);
    };
    let Some(concept_id) = item.pointer("/meta/concept-id").and_then(Value::as_str) else {
        return Ok(None);
    };
    let Some(umm) = item.get("umm").filter(|u| u.is_object()) else {
        return Ok(None);
    };

    let mut record: CollectionRecord = serde_json::from_value(umm.clone())?;
    record.cmr_id = Some(concept_id.to_string());

    let title = record.entry_title.clone().unwrap_or_default();
    let abstract_text = record.abstract_text.clone().unwrap_or_default();
    let (frequency, conflict) = derive_frequency(&title, &abstract_text);
    if conflict {
        warn!(title = %title, "Entry title and abstract disagree on frequency, using title");
    }
    record.frequency = frequency.map(str::to_string);
    Ok(Some(record))
}

const FREQUENCIES: [&str; 4] = ["daily", "hourly", "monthly", "weekly"];

/// Temporal frequency named in the entry title, else in the abstract.
/// The flag is set when both name one and they differ.
pub fn derive_frequency(title: &str, abstract_text: &str) -> (Option<&'static str>, bool) {
    let find = |text: &str| {
        let text = text.to_lowercase();
        FREQUENCIES.into_iter().find(|f| text.contains(f))
    };
    let from_title = find(title);
    let from_abstract = find(abstract_text);
    let conflict = matches!((from_title, from_abstract), (Some(a), Some(b)) if a != b);
    (from_title.or(from_abstract), conflict)
}

#[async_trait]
impl CatalogSource for CmrCatalog {
    async fn fetch_page(&self, cursor: Option<String>) -> Result<CatalogPage, CatalogError> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| CatalogError::Parse(format!("invalid cursor {c:?}")))?,
            None => 0,
        };
        let dois = self.dois().await?;
        let end = (start + self.page_size).min(dois.len());

        let mut page = CatalogPage {
            next: (end < dois.len()).then(|| end.to_string()),
            ..Default::default()
        };
        for doi in dois.get(start..end).unwrap_or_default() {
            match self.fetch_one(doi).await {
                Ok(Some(record)) => page.records.push(record),
                Ok(None) => {
                    warn!(doi = doi.as_str(), "No collection with a concept id for DOI");
                    page.missing_concept_id += 1;
                }
                Err(error) => {
                    warn!(doi = doi.as_str(), error = %error, "Catalog request failed");
                    page.failed.push(FailedFetch {
                        doi: doi.clone(),
                        error,
                    });
                }
            }
        }
        debug!(start, end, fetched = page.records.len(), "Catalog page done");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn title_frequency_wins_over_abstract() {
        assert_eq!(
            derive_frequency("MODIS Daily L3 Snow Cover", "monthly composites are also produced"),
            (Some("daily"), true)
        );
        assert_eq!(derive_frequency("Sea Ice Extent", "Weekly maps"), (Some("weekly"), false));
        assert_eq!(derive_frequency("Hourly winds", "hourly"), (Some("hourly"), false));
        assert_eq!(derive_frequency("Static DEM", ""), (None, false));
    }

    #[test]
    fn parses_first_hit_and_attaches_concept_id() {
        let body = json!({
            "hits": 1,
            "items": [{
                "meta": {"concept-id": "C1234-LPDAAC"},
                "umm": {
                    "ShortName": "MOD10A1",
                    "EntryTitle": "MODIS/Terra Snow Cover Daily L3",
                    "DOI": {"DOI": "10.5067/MODIS/MOD10A1.061"}
                }
            }]
        });
        let record = parse_hit(&body).unwrap().unwrap();
        assert_eq!(record.cmr_id.as_deref(), Some("C1234-LPDAAC"));
        assert_eq!(record.frequency.as_deref(), Some("daily"));
        assert_eq!(record.doi().as_deref(), Some("10.5067/MODIS/MOD10A1.061"));
    }

    #[test]
    fn hit_without_concept_id_is_skipped() {
        let body = json!({"items": [{"meta": {}, "umm": {"ShortName": "X"}}]});
        assert!(parse_hit(&body).unwrap().is_none());
        assert!(parse_hit(&json!({"items": []})).unwrap().is_none());
    }

    #[test]
    fn encodes_doi_into_query() {
        let catalog = CmrCatalog::with_dois("https://cmr.example/", vec![], 10);
        assert_eq!(
            catalog.url("10.5067/A B"),
            "https://cmr.example/search/collections.umm_json?doi=10.5067%2FA%20B"
        );
    }

    #[tokio::test]
    async fn cursor_past_the_end_yields_an_empty_last_page() {
        let catalog = CmrCatalog::with_dois("http://127.0.0.1:9", vec!["10.1/a".into()], 5);
        let page = catalog.fetch_page(Some("1".into())).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next.is_none());
        assert!(catalog.fetch_page(Some("x".into())).await.is_err());
    }

    #[tokio::test]
    async fn unreadable_doi_list_fails_the_first_page() {
        let catalog = CmrCatalog::new("http://127.0.0.1:9", PathBuf::from("/nonexistent/dois.csv"), 5);
        let err = catalog.fetch_page(None).await.unwrap_err();
        assert!(matches!(err, CatalogError::Source(IngestError::SourceUnavailable { .. })));
    }
}
