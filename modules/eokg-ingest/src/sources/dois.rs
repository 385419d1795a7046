use std::path::Path;

use serde::Deserialize;

use eokg_common::IngestError;

use super::{non_empty, Loaded};

#[derive(Debug, Deserialize)]
struct DoiRow {
    #[serde(rename = "DOI_NAME")]
    doi_name: Option<String>,
}

/// Read the collection DOI list (`DOI_NAME` column). Blank cells are skipped.
pub fn read_source_dois(path: &Path) -> Result<Loaded<String>, IngestError> {
    let origin = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|e| IngestError::unavailable(&origin, e))?;

    let headers = reader.headers().map_err(|e| IngestError::unavailable(&origin, e))?;
    if !headers.iter().any(|h| h == "DOI_NAME") {
        return Err(IngestError::unavailable(&origin, "missing DOI_NAME column"));
    }

    let mut loaded = Loaded::default();
    for (offset, row) in reader.deserialize::<DoiRow>().enumerate() {
        match row {
            Ok(row) => match non_empty(row.doi_name.as_deref()) {
                Some(doi) => loaded.push(doi),
                None => loaded.skip(IngestError::format(&origin, offset, "empty DOI_NAME")),
            },
            Err(e) => loaded.skip(IngestError::format(&origin, offset, e)),
        }
    }
    Ok(loaded)
}
