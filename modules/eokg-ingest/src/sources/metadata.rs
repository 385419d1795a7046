//! UMM-C collection records, as saved by the collect stage.

use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use eokg_common::IngestError;

use super::{non_empty, Loaded};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CollectionRecord {
    #[serde(rename = "DOI")]
    pub doi: Option<DoiField>,
    pub short_name: Option<String>,
    pub entry_title: Option<String>,
    #[serde(rename = "Abstract")]
    pub abstract_text: Option<String>,
    #[serde(rename = "CMR_ID")]
    pub cmr_id: Option<String>,
    pub frequency: Option<String>,
    pub data_centers: Vec<DataCenterEntry>,
    pub temporal_extents: Vec<TemporalExtent>,
    pub projects: Vec<NamedEntry>,
    pub platforms: Vec<PlatformEntry>,
    pub science_keywords: Vec<ScienceKeywordEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DoiField {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DataCenterEntry {
    pub roles: Vec<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub contact_information: Option<ContactInformation>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContactInformation {
    pub related_urls: Vec<RelatedUrl>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelatedUrl {
    #[serde(rename = "URL")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TemporalExtent {
    pub range_date_times: Vec<RangeDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RangeDateTime {
    pub beginning_date_time: Option<String>,
    pub ending_date_time: Option<String>,
}

/// Project or instrument.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NamedEntry {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PlatformEntry {
    #[serde(rename = "Type")]
    pub platform_type: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub instruments: Vec<NamedEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ScienceKeywordEntry {
    pub topic: Option<String>,
    pub term: Option<String>,
    #[serde(alias = "Variable_Level_1")]
    pub variable_level1: Option<String>,
    #[serde(alias = "Variable_Level_2")]
    pub variable_level2: Option<String>,
    #[serde(alias = "Variable_Level_3")]
    pub variable_level3: Option<String>,
    #[serde(alias = "Detailed_Variable")]
    pub detailed_variable: Option<String>,
}

impl ScienceKeywordEntry {
    /// Non-empty levels, Topic first. Matches the keyword taxonomy paths.
    pub fn levels(&self) -> Vec<String> {
        [
            &self.topic,
            &self.term,
            &self.variable_level1,
            &self.variable_level2,
            &self.variable_level3,
            &self.detailed_variable,
        ]
        .into_iter()
        .filter_map(|level| non_empty(level.as_deref()))
        .collect()
    }
}

impl CollectionRecord {
    pub fn doi(&self) -> Option<String> {
        non_empty(self.doi.as_ref().and_then(|d| d.doi.as_deref()))
    }

    pub fn short_name(&self) -> Option<String> {
        non_empty(self.short_name.as_deref())
    }

    /// The archiving data center, falling back to the first listed.
    pub fn archive_center(&self) -> Option<&DataCenterEntry> {
        self.data_centers
            .iter()
            .find(|c| c.roles.iter().any(|r| r == "ARCHIVER"))
            .or_else(|| self.data_centers.first())
    }

    pub fn daac(&self) -> Option<String> {
        self.archive_center().and_then(|c| non_empty(c.short_name.as_deref()))
    }

    pub fn abstract_text(&self) -> Option<String> {
        non_empty(self.abstract_text.as_deref()).map(|a| a.replace('\n', ""))
    }

    /// First begin/end pair of the first temporal extent.
    pub fn temporal_extent(&self) -> (Option<String>, Option<String>) {
        self.temporal_extents
            .first()
            .and_then(|t| t.range_date_times.first())
            .map(|r| {
                (
                    non_empty(r.beginning_date_time.as_deref()),
                    non_empty(r.ending_date_time.as_deref()),
                )
            })
            .unwrap_or((None, None))
    }
}

impl DataCenterEntry {
    pub fn url(&self) -> Option<String> {
        self.contact_information
            .as_ref()
            .and_then(|c| c.related_urls.first())
            .and_then(|u| non_empty(u.url.as_deref()))
    }
}

/// Read every `*.json` file under `dir`, in path order.
pub fn read_collections(dir: &Path) -> Result<Loaded<CollectionRecord>, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::unavailable(
            dir.display().to_string(),
            "metadata directory does not exist",
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| IngestError::unavailable(dir.display().to_string(), e))?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "json") {
            files.push(entry.into_path());
        }
    }

    let mut loaded = Loaded::default();
    for (offset, file) in files.iter().enumerate() {
        let origin = file.display().to_string();
        let parsed = std::fs::read_to_string(file)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<CollectionRecord>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(record) => loaded.push(record),
            Err(e) => loaded.skip(IngestError::format(origin, offset, e)),
        }
    }
    Ok(loaded)
}
