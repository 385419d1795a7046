use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use eokg_common::IngestError;

use super::{non_empty, read_to_string, Loaded};

const NO_ABSTRACT: &str = "No abstract available";

#[derive(Debug, Clone, PartialEq)]
pub struct PublicationRecord {
    /// Raw DOI as it appears in the source.
    pub doi: String,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    /// Datasets referenced by `doi:` tags.
    pub dataset_dois: Vec<String>,
    /// Datasets referenced by short name in the cited references.
    pub dataset_short_names: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPublication {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<Value>,
    #[serde(rename = "Abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "Authors")]
    authors: Option<Authors>,
    tags: Vec<Tag>,
    #[serde(rename = "Cited-References")]
    cited_references: Vec<CitedReference>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Tag {
    Plain(String),
    Object { tag: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CitedReference {
    #[serde(rename = "Shortname")]
    shortname: Option<String>,
}

/// Author lists arrive either as an array or as one pre-joined string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Authors {
    List(Vec<String>),
    Joined(String),
}

impl Authors {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Authors::List(list) => list.into_iter().filter_map(|a| non_empty(Some(a.as_str()))).collect(),
            Authors::Joined(joined) => non_empty(Some(joined.as_str())).into_iter().collect(),
        }
    }
}

/// Years show up as numbers or as strings.
pub(crate) fn parse_year(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn clean_abstract(value: Option<&str>) -> Option<String> {
    non_empty(value).filter(|a| a != NO_ABSTRACT)
}

impl RawPublication {
    fn into_record(self) -> Option<PublicationRecord> {
        let doi = non_empty(self.doi.as_deref())?;
        let dataset_dois = self
            .tags
            .into_iter()
            .map(|t| match t {
                Tag::Plain(s) | Tag::Object { tag: s } => s,
            })
            .filter_map(|t| t.trim().strip_prefix("doi:").and_then(|d| non_empty(Some(d))))
            .collect();
        let dataset_short_names = self
            .cited_references
            .into_iter()
            .filter_map(|r| non_empty(r.shortname.as_deref()))
            .collect();

        Some(PublicationRecord {
            doi,
            title: non_empty(self.title.as_deref()),
            year: parse_year(self.year.as_ref()),
            abstract_text: clean_abstract(self.abstract_text.as_deref()),
            authors: self.authors.map(Authors::into_vec).unwrap_or_default(),
            dataset_dois,
            dataset_short_names,
        })
    }
}

/// Read the publications JSON array. Entries without a DOI are skipped.
pub fn read_publications(path: &Path) -> Result<Loaded<PublicationRecord>, IngestError> {
    let origin = path.display().to_string();
    let entries: Vec<Value> =
        serde_json::from_str(&read_to_string(path)?).map_err(|e| IngestError::unavailable(&origin, e))?;

    let mut loaded = Loaded::default();
    for (offset, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<RawPublication>(entry) {
            Ok(raw) => match raw.into_record() {
                Some(record) => loaded.push(record),
                None => loaded.skip(IngestError::format(&origin, offset, "publication has no DOI")),
            },
            Err(e) => loaded.skip(IngestError::format(&origin, offset, e)),
        }
    }
    Ok(loaded)
}
