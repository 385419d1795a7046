//! Node stages: datasets and the entities named in their metadata, publications, keywords.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use eokg_common::{
    global_id, normalize, normalize_opt, properties, EdgeKind, EntityType, NodeKind, NormalizedKey, NormalizedRecord,
    PropValue, Properties, DOI, NAME_KEY, PATH, SHORT_NAME_KEY,
};
use eokg_graph::{GraphStore, StoreError};

use crate::hierarchy::HierarchyBuilder;
use crate::sources::keywords::read_keywords;
use crate::sources::metadata::{read_collections, CollectionRecord};
use crate::sources::non_empty;
use crate::sources::publications::read_publications;

use super::{Stage, StageContext, StageError, StageId, StageReport};

pub fn node_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(DatasetNodesStage),
        Box::new(ShortNameNodesStage::new(NodeKind::DataCenter)),
        Box::new(ShortNameNodesStage::new(NodeKind::Project)),
        Box::new(ShortNameNodesStage::new(NodeKind::Platform)),
        Box::new(ShortNameNodesStage::new(NodeKind::Instrument)),
        Box::new(PublicationNodesStage),
        Box::new(KeywordNodesStage),
    ]
}

// ---------------------------------------------------------------------------
// Keys shared with the edge stages
// ---------------------------------------------------------------------------

/// Resolves collection records to Dataset `globalId`s against what is already stored.
///
/// New datasets are keyed on their DOI, or on their short name when they have none.
/// A dataset first stored without a DOI keeps its short-name id once a record with
/// a DOI turns up for it; the first DOI to claim that node takes it over.
pub(crate) struct DatasetIds<'a> {
    store: &'a dyn GraphStore,
    stored: HashMap<String, Option<String>>,
    claimed: HashMap<String, String>,
}

impl<'a> DatasetIds<'a> {
    pub(crate) fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            stored: HashMap::new(),
            claimed: HashMap::new(),
        }
    }

    pub(crate) async fn resolve(&mut self, record: &CollectionRecord) -> Result<Option<String>, StoreError> {
        let short_id = short_name_global_id(record.short_name().as_deref());
        let NormalizedKey::Key(doi) = normalize_opt(record.doi().as_deref()) else {
            return Ok(short_id);
        };
        if let Some(existing) = self.stored_with_doi(&doi).await? {
            return Ok(Some(existing));
        }
        if let Some(short_id) = short_id {
            let free = match self.claimed.get(&short_id) {
                Some(owner) => *owner == doi,
                None => self.store.lacks_property(NodeKind::Dataset, &short_id, DOI).await?,
            };
            if free {
                info!(doi = doi.as_str(), "Dataset stored without DOI now has one, keeping its id");
                self.claimed.insert(short_id.clone(), doi);
                return Ok(Some(short_id));
            }
        }
        Ok(Some(global_id(&doi)))
    }

    /// A dataset cited by DOI elsewhere, e.g. a publication's `doi:` tag.
    pub(crate) async fn resolve_doi(&mut self, doi: &str) -> Result<Option<String>, StoreError> {
        let NormalizedKey::Key(doi) = normalize(doi) else {
            return Ok(None);
        };
        let existing = self.stored_with_doi(&doi).await?;
        Ok(Some(existing.unwrap_or_else(|| global_id(&doi))))
    }

    async fn stored_with_doi(&mut self, doi: &str) -> Result<Option<String>, StoreError> {
        if let Some(hit) = self.stored.get(doi) {
            return Ok(hit.clone());
        }
        let found = self
            .store
            .find_by_natural_key(NodeKind::Dataset, DOI, &NormalizedKey::Key(doi.to_string()))
            .await?
            .map(|n| n.global_id);
        self.stored.insert(doi.to_string(), found.clone());
        Ok(found)
    }
}

/// DataCenter, Project, Platform and Instrument are keyed on their short name.
pub(crate) fn short_name_global_id(short_name: Option<&str>) -> Option<String> {
    normalize_opt(short_name).global_id()
}

/// Node records deduplicated by `globalId`. The first non-null value of each property wins.
#[derive(Default)]
pub(crate) struct NodeSet {
    index: HashMap<String, usize>,
    records: Vec<NormalizedRecord>,
}

impl NodeSet {
    pub(crate) fn add(&mut self, global_id: String, props: Properties) {
        match self.index.get(&global_id) {
            Some(&slot) => {
                let existing = &mut self.records[slot].properties;
                for (name, value) in props {
                    if value.is_null() {
                        continue;
                    }
                    let missing = existing.get(&name).map_or(true, PropValue::is_null);
                    if missing {
                        existing.insert(name, value);
                    }
                }
            }
            None => {
                self.index.insert(global_id.clone(), self.records.len());
                self.records.push(NormalizedRecord::node(global_id, props));
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

fn dataset_properties(record: &CollectionRecord) -> Properties {
    let doi = normalize_opt(record.doi().as_deref());
    let short_name = record.short_name();
    let (start, end) = record.temporal_extent();
    properties([
        (DOI, PropValue::from(doi.as_str())),
        (SHORT_NAME_KEY, normalize_opt(short_name.as_deref()).as_str().into()),
        ("shortName", short_name.into()),
        ("longName", non_empty(record.entry_title.as_deref()).into()),
        ("daac", record.daac().into()),
        ("abstract", record.abstract_text().into()),
        ("cmrId", non_empty(record.cmr_id.as_deref()).into()),
        ("temporalExtentStart", start.into()),
        ("temporalExtentEnd", end.into()),
        ("temporalFrequency", non_empty(record.frequency.as_deref()).into()),
    ])
}

pub struct DatasetNodesStage;

#[async_trait]
impl Stage for DatasetNodesStage {
    fn id(&self) -> StageId {
        StageId::DatasetNodes
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_collections(&ctx.paths.dataset_metadata_dir)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut ids = DatasetIds::new(ctx.store.as_ref());
        let mut nodes = NodeSet::default();
        for (offset, record) in loaded.items.iter().enumerate() {
            match ids.resolve(record).await? {
                Some(gid) => nodes.add(gid, dataset_properties(record)),
                None => {
                    warn!(offset, "Collection record has neither DOI nor short name");
                    report.malformed += 1;
                }
            }
        }

        info!(files = loaded.items.len(), datasets = nodes.len(), "Loading datasets");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Node(NodeKind::Dataset), &nodes.into_records())
                .await?,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Short-name entities
// ---------------------------------------------------------------------------

/// One DataCenter, Project, Platform or Instrument mention in a collection record.
pub(crate) struct Mention {
    pub short_name: Option<String>,
    pub props: Properties,
}

fn mention(short_name: Option<&str>, long_name: Option<&str>, extra: Properties) -> Mention {
    let short_name = non_empty(short_name);
    let mut props = properties([
        (SHORT_NAME_KEY, PropValue::from(normalize_opt(short_name.as_deref()).as_str())),
        ("shortName", short_name.clone().into()),
        ("longName", non_empty(long_name).into()),
    ]);
    props.extend(extra);
    Mention { short_name, props }
}

/// Every mention of `kind` in the record, in document order.
pub(crate) fn mentions(kind: NodeKind, record: &CollectionRecord) -> Vec<Mention> {
    match kind {
        NodeKind::DataCenter => record
            .data_centers
            .iter()
            .map(|c| {
                mention(
                    c.short_name.as_deref(),
                    c.long_name.as_deref(),
                    properties([("url", c.url())]),
                )
            })
            .collect(),
        NodeKind::Project => record
            .projects
            .iter()
            .map(|p| mention(p.short_name.as_deref(), p.long_name.as_deref(), Properties::new()))
            .collect(),
        NodeKind::Platform => record
            .platforms
            .iter()
            .map(|p| {
                mention(
                    p.short_name.as_deref(),
                    p.long_name.as_deref(),
                    properties([("type", non_empty(p.platform_type.as_deref()))]),
                )
            })
            .collect(),
        NodeKind::Instrument => record
            .platforms
            .iter()
            .flat_map(|p| &p.instruments)
            .map(|i| mention(i.short_name.as_deref(), i.long_name.as_deref(), Properties::new()))
            .collect(),
        _ => Vec::new(),
    }
}

pub struct ShortNameNodesStage {
    kind: NodeKind,
}

impl ShortNameNodesStage {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Stage for ShortNameNodesStage {
    fn id(&self) -> StageId {
        match self.kind {
            NodeKind::DataCenter => StageId::DataCenterNodes,
            NodeKind::Project => StageId::ProjectNodes,
            NodeKind::Platform => StageId::PlatformNodes,
            _ => StageId::InstrumentNodes,
        }
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_collections(&ctx.paths.dataset_metadata_dir)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut nodes = NodeSet::default();
        for record in &loaded.items {
            for m in mentions(self.kind, record) {
                match short_name_global_id(m.short_name.as_deref()) {
                    Some(gid) => nodes.add(gid, m.props),
                    None => report.malformed += 1,
                }
            }
        }
        if report.malformed > 0 {
            warn!(kind = %self.kind, skipped = report.malformed, "Mentions without a short name skipped");
        }

        info!(kind = %self.kind, nodes = nodes.len(), "Loading short-name entities");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Node(self.kind), &nodes.into_records())
                .await?,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Publications
// ---------------------------------------------------------------------------

pub struct PublicationNodesStage;

#[async_trait]
impl Stage for PublicationNodesStage {
    fn id(&self) -> StageId {
        StageId::PublicationNodes
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_publications(&ctx.paths.publications_json)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut nodes = NodeSet::default();
        for publication in loaded.items {
            let key = normalize(&publication.doi);
            let Some(gid) = key.global_id() else {
                report.malformed += 1;
                continue;
            };
            let authors = (!publication.authors.is_empty()).then_some(publication.authors);
            nodes.add(
                gid,
                properties([
                    (DOI, PropValue::from(key.as_str())),
                    ("title", publication.title.into()),
                    ("year", publication.year.into()),
                    ("abstract", publication.abstract_text.into()),
                    ("authors", authors.into()),
                    ("placeholder", false.into()),
                ]),
            );
        }

        info!(publications = nodes.len(), "Loading publications");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Node(NodeKind::Publication), &nodes.into_records())
                .await?,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Keyword taxonomy
// ---------------------------------------------------------------------------

pub struct KeywordNodesStage;

#[async_trait]
impl Stage for KeywordNodesStage {
    fn id(&self) -> StageId {
        StageId::KeywordNodes
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_keywords(&ctx.paths.keywords_csv)?;
        let hierarchy = HierarchyBuilder::new(ctx.settings.max_keyword_depth).build(&loaded.items);

        let mut report = StageReport {
            malformed: loaded.skipped_count() + hierarchy.rejected.len() as u64,
            ..Default::default()
        };

        let nodes: Vec<NormalizedRecord> = hierarchy
            .nodes
            .iter()
            .map(|n| {
                NormalizedRecord::node(
                    n.global_id.clone(),
                    properties([
                        ("name", n.name.as_str()),
                        (NAME_KEY, n.name_key.as_str()),
                        (PATH, n.path.as_str()),
                    ]),
                )
            })
            .collect();
        let edges: Vec<NormalizedRecord> = hierarchy
            .edges
            .iter()
            .map(|(parent, child)| NormalizedRecord::edge(parent.clone(), child.clone()))
            .collect();

        info!(
            keywords = nodes.len(),
            parent_edges = edges.len(),
            orphans = hierarchy.orphans.len(),
            rejected = hierarchy.rejected.len(),
            "Loading keyword taxonomy"
        );

        let executor = ctx.executor();
        report.absorb(executor.upsert(EntityType::Node(NodeKind::ScienceKeyword), &nodes).await?);
        report.absorb(executor.upsert(EntityType::Edge(EdgeKind::ParentOf), &edges).await?);
        Ok(report)
    }
}
