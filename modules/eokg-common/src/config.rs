use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::IngestError;

/// Connection settings loaded from environment variables.
/// Secrets only; everything that shapes a run lives in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    /// Bolt connection pool size.
    pub neo4j_max_connections: usize,
    pub cmr_base_url: String,
}

pub const DEFAULT_CMR_BASE_URL: &str = "https://cmr.earthdata.nasa.gov";
pub const DEFAULT_NEO4J_MAX_CONNECTIONS: usize = 10;

impl AppConfig {
    /// Load configuration for a run against Neo4j. Fails if credentials are missing.
    pub fn from_env() -> Result<Self, IngestError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            neo4j_uri: required_env("NEO4J_URI")?,
            neo4j_user: required_env("NEO4J_USER")?,
            neo4j_password: required_env("NEO4J_PASSWORD")?,
            neo4j_max_connections: max_connections_env()?,
            cmr_base_url: env::var("CMR_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CMR_BASE_URL.to_string()),
        })
    }

    /// Load a minimal config for dry runs (no database credentials needed).
    pub fn dry_run_from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            neo4j_uri: env::var("NEO4J_URI").unwrap_or_default(),
            neo4j_user: env::var("NEO4J_USER").unwrap_or_default(),
            neo4j_password: String::new(),
            neo4j_max_connections: DEFAULT_NEO4J_MAX_CONNECTIONS,
            cmr_base_url: env::var("CMR_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CMR_BASE_URL.to_string()),
        }
    }

    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  NEO4J_URI: {}", self.neo4j_uri);
        tracing::info!("  NEO4J_USER: {}", self.neo4j_user);
        tracing::info!(
            "  NEO4J_PASSWORD: {}",
            if self.neo4j_password.is_empty() { "<not set>" } else { "<redacted>" }
        );
        tracing::info!("  NEO4J_MAX_CONNECTIONS: {}", self.neo4j_max_connections);
        tracing::info!("  CMR_BASE_URL: {}", self.cmr_base_url);
    }
}

fn required_env(key: &str) -> Result<String, IngestError> {
    env::var(key).map_err(|_| IngestError::Config(format!("{key} environment variable is required")))
}

fn max_connections_env() -> Result<usize, IngestError> {
    match env::var("NEO4J_MAX_CONNECTIONS") {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(IngestError::Config(format!(
                "NEO4J_MAX_CONNECTIONS must be a positive integer, got {raw:?}"
            ))),
        },
        Err(_) => Ok(DEFAULT_NEO4J_MAX_CONNECTIONS),
    }
}

/// TOML-backed run configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub paths: PathsConfig,
    pub ingest: IngestSettings,
    pub stages: StagesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    /// CSV with a `DOI_NAME` column listing the collections to fetch.
    pub source_dois: PathBuf,
    /// Directory of UMM JSON collection records (written by the collect stage).
    pub dataset_metadata_dir: PathBuf,
    /// Keyword taxonomy CSV.
    pub keywords_csv: PathBuf,
    /// JSON array of publication records.
    pub publications_json: PathBuf,
    /// Citation pairs (array or citing-DOI map).
    pub citations_json: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dois: PathBuf::from("data/source_dois.csv"),
            dataset_metadata_dir: PathBuf::from("data/dataset_metadata"),
            keywords_csv: PathBuf::from("data/gcmd_sciencekeywords.csv"),
            publications_json: PathBuf::from("data/publications.json"),
            citations_json: PathBuf::from("data/publications_of_publications.json"),
        }
    }
}

/// What to do with a citation whose endpoint is not a loaded Publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Report the pair as unresolved and write nothing.
    #[default]
    Drop,
    /// Create a minimal Publication (DOI only) and keep the edge.
    Placeholder,
}

/// Settings threaded through the orchestrator into every stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub unresolved_citations: UnresolvedPolicy,
    /// Longest ancestor path the hierarchy builder will follow before calling it a cycle.
    pub max_keyword_depth: usize,
    /// Pending batches are abandoned once the run has been going this long.
    pub run_timeout_secs: Option<u64>,
    pub embedding_dimension: usize,
    /// DOIs fetched per catalog page.
    pub catalog_page_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            unresolved_citations: UnresolvedPolicy::Drop,
            max_keyword_depth: 16,
            run_timeout_secs: None,
            embedding_dimension: 512,
            catalog_page_size: 25,
        }
    }
}

/// Per-stage enable flags keyed by stage name. Unlisted stages are enabled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StagesConfig(pub BTreeMap<String, bool>);

impl StagesConfig {
    pub fn is_enabled(&self, stage: &str) -> bool {
        self.0.get(stage).copied().unwrap_or(true)
    }

    pub fn set(&mut self, stage: impl Into<String>, enabled: bool) {
        self.0.insert(stage.into(), enabled);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FileConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, IngestError> {
        let config: FileConfig = toml::from_str(content)
            .map_err(|e| IngestError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), IngestError> {
        if self.ingest.batch_size == 0 {
            return Err(IngestError::Config("ingest.batch_size must be at least 1".into()));
        }
        if self.ingest.max_keyword_depth == 0 {
            return Err(IngestError::Config("ingest.max_keyword_depth must be at least 1".into()));
        }
        if self.ingest.catalog_page_size == 0 {
            return Err(IngestError::Config("ingest.catalog_page_size must be at least 1".into()));
        }
        Ok(())
    }
}
