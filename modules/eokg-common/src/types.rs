use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedKey;

pub use crate::normalize::global_id;

// ---------------------------------------------------------------------------
// Node and edge kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Dataset,
    Publication,
    ScienceKeyword,
    Platform,
    Instrument,
    Project,
    DataCenter,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Dataset,
        NodeKind::Publication,
        NodeKind::ScienceKeyword,
        NodeKind::Platform,
        NodeKind::Instrument,
        NodeKind::Project,
        NodeKind::DataCenter,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Dataset => "Dataset",
            NodeKind::Publication => "Publication",
            NodeKind::ScienceKeyword => "ScienceKeyword",
            NodeKind::Platform => "Platform",
            NodeKind::Instrument => "Instrument",
            NodeKind::Project => "Project",
            NodeKind::DataCenter => "DataCenter",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        match self {
            NodeKind::Dataset => NodeDescriptor {
                kind: *self,
                unique: &[GLOBAL_ID, DOI],
                lookup: &[DOI, SHORT_NAME_KEY],
            },
            NodeKind::Publication => NodeDescriptor {
                kind: *self,
                unique: &[GLOBAL_ID, DOI],
                lookup: &[DOI],
            },
            NodeKind::ScienceKeyword => NodeDescriptor {
                kind: *self,
                unique: &[GLOBAL_ID, PATH],
                lookup: &[NAME_KEY],
            },
            NodeKind::Platform | NodeKind::Instrument | NodeKind::Project | NodeKind::DataCenter => {
                NodeDescriptor {
                    kind: *self,
                    unique: &[GLOBAL_ID, SHORT_NAME_KEY],
                    lookup: &[],
                }
            }
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Property that every node is merged on.
pub const GLOBAL_ID: &str = "globalId";
/// Normalized DOI (Publication, Dataset).
pub const DOI: &str = "doi";
/// Normalized short name (Platform, Instrument, Project, DataCenter, Dataset).
pub const SHORT_NAME_KEY: &str = "shortNameKey";
/// Normalized keyword term (ScienceKeyword).
pub const NAME_KEY: &str = "nameKey";
/// Normalized ancestor path, root first (ScienceKeyword).
pub const PATH: &str = "path";

/// How a node label is keyed and looked up in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub kind: NodeKind,
    /// Properties unique within the label. The first entry is the merge key.
    pub unique: &'static [&'static str],
    /// Non-unique natural-key properties that get an index for lookups.
    pub lookup: &'static [&'static str],
}

impl NodeDescriptor {
    pub fn merge_key(&self) -> &'static str {
        self.unique[0]
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    HasDataset,
    OfProject,
    HasPlatform,
    HasInstrument,
    HasScienceKeyword,
    ParentOf,
    Cites,
    UsesDataset,
    AppliesTo,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 9] = [
        EdgeKind::HasDataset,
        EdgeKind::OfProject,
        EdgeKind::HasPlatform,
        EdgeKind::HasInstrument,
        EdgeKind::HasScienceKeyword,
        EdgeKind::ParentOf,
        EdgeKind::Cites,
        EdgeKind::UsesDataset,
        EdgeKind::AppliesTo,
    ];

    pub fn descriptor(&self) -> EdgeDescriptor {
        let (rel_type, source, target) = match self {
            EdgeKind::HasDataset => ("HAS_DATASET", NodeKind::DataCenter, NodeKind::Dataset),
            EdgeKind::OfProject => ("OF_PROJECT", NodeKind::Dataset, NodeKind::Project),
            EdgeKind::HasPlatform => ("HAS_PLATFORM", NodeKind::Dataset, NodeKind::Platform),
            EdgeKind::HasInstrument => ("HAS_INSTRUMENT", NodeKind::Platform, NodeKind::Instrument),
            EdgeKind::HasScienceKeyword => {
                ("HAS_SCIENCEKEYWORD", NodeKind::Dataset, NodeKind::ScienceKeyword)
            }
            EdgeKind::ParentOf => ("PARENT_OF", NodeKind::ScienceKeyword, NodeKind::ScienceKeyword),
            EdgeKind::Cites => ("CITES", NodeKind::Publication, NodeKind::Publication),
            EdgeKind::UsesDataset => ("USES_DATASET", NodeKind::Publication, NodeKind::Dataset),
            EdgeKind::AppliesTo => ("APPLIES_TO", NodeKind::Publication, NodeKind::ScienceKeyword),
        };
        EdgeDescriptor {
            kind: *self,
            rel_type,
            source,
            target,
        }
    }

    pub fn rel_type(&self) -> &'static str {
        self.descriptor().rel_type
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rel_type())
    }
}

/// Relationship type plus the labels on either end. Endpoints are matched on `globalId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeDescriptor {
    pub kind: EdgeKind,
    pub rel_type: &'static str,
    pub source: NodeKind,
    pub target: NodeKind,
}

/// What a single executor run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Create-or-match nodes keyed on `globalId`.
    Node(NodeKind),
    /// Create-or-match relationships between existing nodes.
    Edge(EdgeKind),
    /// Set properties on existing nodes, never creating them (analytics write-back).
    NodeProperties(NodeKind),
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Node(k) => write!(f, "node:{k}"),
            EntityType::Edge(k) => write!(f, "edge:{k}"),
            EntityType::NodeProperties(k) => write!(f, "properties:{k}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Property values and records
// ---------------------------------------------------------------------------

/// A property value the store knows how to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
    FloatList(Vec<f64>),
}

impl PropValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Text(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Text(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<Vec<String>> for PropValue {
    fn from(v: Vec<String>) -> Self {
        PropValue::TextList(v)
    }
}

impl From<Vec<f64>> for PropValue {
    fn from(v: Vec<f64>) -> Self {
        PropValue::FloatList(v)
    }
}

impl<T: Into<PropValue>> From<Option<T>> for PropValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PropValue::Null)
    }
}

pub type Properties = BTreeMap<String, PropValue>;

/// Build a property map from `(name, value)` pairs.
pub fn properties<I, K, V>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A node as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub global_id: String,
}

/// Identity of a record handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Node `globalId`.
    Node(NormalizedKey),
    /// Source and target `globalId`s.
    Edge {
        source: NormalizedKey,
        target: NormalizedKey,
    },
}

/// One normalized record of a single entity type, ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub key: RecordKey,
    pub properties: Properties,
}

impl NormalizedRecord {
    pub fn node(global_id: impl Into<String>, properties: Properties) -> Self {
        Self {
            key: RecordKey::Node(NormalizedKey::Key(global_id.into())),
            properties,
        }
    }

    pub fn edge(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: RecordKey::Edge {
                source: NormalizedKey::Key(source.into()),
                target: NormalizedKey::Key(target.into()),
            },
            properties: Properties::new(),
        }
    }

    /// A record whose identity could not be established. Always rejected by the store.
    pub fn keyless(properties: Properties) -> Self {
        Self {
            key: RecordKey::Node(NormalizedKey::Absent),
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(NodeKind::from_label("Story"), None);
    }

    #[test]
    fn every_descriptor_merges_on_global_id() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.descriptor().merge_key(), GLOBAL_ID);
        }
    }

    #[test]
    fn edge_descriptors_point_the_right_way() {
        let cites = EdgeKind::Cites.descriptor();
        assert_eq!(cites.rel_type, "CITES");
        assert_eq!(cites.source, NodeKind::Publication);

        let has_dataset = EdgeKind::HasDataset.descriptor();
        assert_eq!(has_dataset.source, NodeKind::DataCenter);
        assert_eq!(has_dataset.target, NodeKind::Dataset);
    }

    #[test]
    fn option_props_become_null() {
        let props = properties([("title", PropValue::from(None::<String>)), ("year", 2020i64.into())]);
        assert!(props["title"].is_null());
        assert_eq!(props["year"], PropValue::Int(2020));
    }
}
