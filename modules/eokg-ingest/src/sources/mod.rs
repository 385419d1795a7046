//! Readers for the local input files. Each returns the records it could use
//! plus a `SourceFormat` error for every record it skipped; only a file that
//! cannot be read at all is an `Err`.

pub mod citations;
pub mod dois;
pub mod keywords;
pub mod metadata;
pub mod publications;

use std::path::Path;

use tracing::warn;

use eokg_common::IngestError;

/// Records read from a source, plus the ones that were skipped.
#[derive(Debug)]
pub struct Loaded<T> {
    pub items: Vec<T>,
    pub skipped: Vec<IngestError>,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Loaded<T> {
    pub(crate) fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub(crate) fn skip(&mut self, err: IngestError) {
        warn!(error = %err, "Skipping record");
        self.skipped.push(err);
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.len() as u64
    }
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, IngestError> {
    std::fs::read_to_string(path).map_err(|e| IngestError::unavailable(path.display().to_string(), e))
}

/// Empty strings and placeholder values count as missing.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "N/A")
        .map(str::to_string)
}
