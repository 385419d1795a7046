use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use eokg_common::IngestError;

use super::publications::{clean_abstract, parse_year, Authors};
use super::{non_empty, read_to_string, Loaded};

/// What the source knows about a cited publication. Used only to enrich placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitedMetadata {
    pub title: Option<String>,
    pub year: Option<i64>,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
}

/// One raw (citing, cited) pair, identifiers exactly as found.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCitation {
    pub citing: String,
    pub cited: String,
    pub cited_metadata: Option<CitedMetadata>,
}

impl RawCitation {
    pub fn new(citing: impl Into<String>, cited: impl Into<String>) -> Self {
        Self {
            citing: citing.into(),
            cited: cited.into(),
            cited_metadata: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PairEntry {
    citing: Option<String>,
    cited: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CitedEntry {
    doi: Option<String>,
    title: Option<String>,
    year: Option<Value>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    authors: Option<Authors>,
}

/// Read citation pairs. Accepts an array of `{citing, cited}` objects or a map
/// from citing DOI to the list of publications it cites.
pub fn read_citations(path: &Path) -> Result<Loaded<RawCitation>, IngestError> {
    let origin = path.display().to_string();
    let document: Value =
        serde_json::from_str(&read_to_string(path)?).map_err(|e| IngestError::unavailable(&origin, e))?;

    let mut loaded = Loaded::default();
    match document {
        Value::Array(entries) => {
            for (offset, entry) in entries.into_iter().enumerate() {
                match serde_json::from_value::<PairEntry>(entry) {
                    Ok(PairEntry {
                        citing: Some(citing),
                        cited: Some(cited),
                    }) => loaded.push(RawCitation::new(citing, cited)),
                    Ok(_) => loaded.skip(IngestError::format(&origin, offset, "pair needs citing and cited")),
                    Err(e) => loaded.skip(IngestError::format(&origin, offset, e)),
                }
            }
        }
        Value::Object(map) => {
            let mut offset = 0;
            for (citing, cited_list) in map {
                let Value::Array(cited_list) = cited_list else {
                    loaded.skip(IngestError::format(&origin, offset, format!("{citing}: expected a list")));
                    offset += 1;
                    continue;
                };
                for entry in cited_list {
                    match serde_json::from_value::<CitedEntry>(entry) {
                        Ok(entry) => match non_empty(entry.doi.as_deref()) {
                            Some(cited) => loaded.push(RawCitation {
                                citing: citing.clone(),
                                cited,
                                cited_metadata: Some(CitedMetadata {
                                    title: non_empty(entry.title.as_deref()),
                                    year: parse_year(entry.year.as_ref()),
                                    abstract_text: clean_abstract(entry.abstract_text.as_deref()),
                                    authors: entry.authors.map(Authors::into_vec).unwrap_or_default(),
                                }),
                            }),
                            None => loaded.skip(IngestError::format(&origin, offset, "cited entry has no doi")),
                        },
                        Err(e) => loaded.skip(IngestError::format(&origin, offset, e)),
                    }
                    offset += 1;
                }
            }
        }
        _ => {
            return Err(IngestError::unavailable(
                origin,
                "expected an array of pairs or a map of citing DOI to cited list",
            ))
        }
    }
    Ok(loaded)
}
