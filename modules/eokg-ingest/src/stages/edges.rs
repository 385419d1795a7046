//! Edge stages. Every endpoint is addressed by `globalId`; the executor counts
//! an edge whose endpoint is not in the store as unresolved.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use eokg_common::{global_id, normalize, EdgeKind, EntityType, NodeKind, NormalizedKey, NormalizedRecord, NAME_KEY, SHORT_NAME_KEY};

use crate::citation::CitationResolver;
use crate::classify::ResearchAreaClassifier;
use crate::hierarchy::keyword_path;
use crate::sources::citations::read_citations;
use crate::sources::metadata::{read_collections, CollectionRecord};
use crate::sources::publications::read_publications;

use super::nodes::{mentions, short_name_global_id, DatasetIds};
use super::{Stage, StageContext, StageError, StageId, StageReport};

pub fn edge_stages(classifier: Arc<dyn ResearchAreaClassifier>) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(MetadataEdgeStage::new(EdgeKind::HasDataset)),
        Box::new(MetadataEdgeStage::new(EdgeKind::OfProject)),
        Box::new(MetadataEdgeStage::new(EdgeKind::HasPlatform)),
        Box::new(MetadataEdgeStage::new(EdgeKind::HasInstrument)),
        Box::new(PublicationDatasetStage),
        Box::new(MetadataEdgeStage::new(EdgeKind::HasScienceKeyword)),
        Box::new(CitationStage),
        Box::new(ResearchAreaStage::new(classifier)),
    ]
}

/// Edge records deduplicated on (source, target).
#[derive(Default)]
struct EdgeSet {
    seen: HashSet<(String, String)>,
    records: Vec<NormalizedRecord>,
}

impl EdgeSet {
    fn add(&mut self, source: String, target: String) {
        if self.seen.insert((source.clone(), target.clone())) {
            self.records.push(NormalizedRecord::edge(source, target));
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ---------------------------------------------------------------------------
// Edges read from collection metadata
// ---------------------------------------------------------------------------

type Endpoints = (Option<String>, Option<String>);

/// (source, target) ids for every `kind` edge the record implies. A `None` end has no usable key.
/// `dataset` is the record's resolved Dataset id; `HAS_INSTRUMENT` does not use it.
fn metadata_endpoints(kind: EdgeKind, record: &CollectionRecord, dataset: Option<String>) -> Vec<Endpoints> {
    let from_dataset = |target: NodeKind| -> Vec<Endpoints> {
        mentions(target, record)
            .into_iter()
            .map(|m| (dataset.clone(), short_name_global_id(m.short_name.as_deref())))
            .collect()
    };

    match kind {
        EdgeKind::HasDataset => mentions(NodeKind::DataCenter, record)
            .into_iter()
            .map(|m| (short_name_global_id(m.short_name.as_deref()), dataset.clone()))
            .collect(),
        EdgeKind::OfProject => from_dataset(NodeKind::Project),
        EdgeKind::HasPlatform => from_dataset(NodeKind::Platform),
        EdgeKind::HasInstrument => record
            .platforms
            .iter()
            .flat_map(|p| {
                let platform = short_name_global_id(p.short_name.as_deref());
                p.instruments
                    .iter()
                    .map(move |i| (platform.clone(), short_name_global_id(i.short_name.as_deref())))
            })
            .collect(),
        EdgeKind::HasScienceKeyword => record
            .science_keywords
            .iter()
            .map(|k| (dataset.clone(), keyword_path(&k.levels()).map(|path| global_id(&path))))
            .collect(),
        _ => Vec::new(),
    }
}

pub struct MetadataEdgeStage {
    kind: EdgeKind,
}

impl MetadataEdgeStage {
    pub fn new(kind: EdgeKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Stage for MetadataEdgeStage {
    fn id(&self) -> StageId {
        match self.kind {
            EdgeKind::HasDataset => StageId::DataCenterDataset,
            EdgeKind::OfProject => StageId::DatasetProject,
            EdgeKind::HasPlatform => StageId::DatasetPlatform,
            EdgeKind::HasInstrument => StageId::PlatformInstrument,
            _ => StageId::DatasetKeyword,
        }
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_collections(&ctx.paths.dataset_metadata_dir)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut ids = DatasetIds::new(ctx.store.as_ref());
        let mut edges = EdgeSet::default();
        let mut keyless = 0;
        for record in &loaded.items {
            let dataset = match self.kind {
                EdgeKind::HasInstrument => None,
                _ => ids.resolve(record).await?,
            };
            for endpoints in metadata_endpoints(self.kind, record, dataset) {
                match endpoints {
                    (Some(source), Some(target)) => edges.add(source, target),
                    _ => keyless += 1,
                }
            }
        }
        if keyless > 0 {
            warn!(edge = %self.kind, keyless, "Edges with a keyless endpoint skipped");
        }
        report.malformed += keyless;

        info!(edge = %self.kind, edges = edges.len(), "Loading metadata edges");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Edge(self.kind), &edges.records)
                .await?,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Publication → Dataset
// ---------------------------------------------------------------------------

/// `USES_DATASET` from `doi:` tags and from short names in cited references.
pub struct PublicationDatasetStage;

#[async_trait]
impl Stage for PublicationDatasetStage {
    fn id(&self) -> StageId {
        StageId::PublicationDataset
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_publications(&ctx.paths.publications_json)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut ids = DatasetIds::new(ctx.store.as_ref());
        let mut by_short_name: HashMap<String, Vec<String>> = HashMap::new();
        let mut edges = EdgeSet::default();
        for publication in &loaded.items {
            let Some(source) = normalize(&publication.doi).global_id() else {
                report.malformed += 1;
                continue;
            };

            for doi in &publication.dataset_dois {
                if let Some(target) = ids.resolve_doi(doi).await? {
                    edges.add(source.clone(), target);
                }
            }

            // Versions of a collection share a short name; the publication uses each of them.
            for short_name in &publication.dataset_short_names {
                let NormalizedKey::Key(key) = normalize(short_name) else { continue };
                if !by_short_name.contains_key(&key) {
                    let found = ctx
                        .store
                        .find_all_by_natural_key(NodeKind::Dataset, SHORT_NAME_KEY, &NormalizedKey::Key(key.clone()))
                        .await?;
                    by_short_name.insert(key.clone(), found.into_iter().map(|n| n.global_id).collect());
                }
                match by_short_name.get(&key) {
                    Some(targets) if !targets.is_empty() => {
                        for target in targets {
                            edges.add(source.clone(), target.clone());
                        }
                    }
                    _ => report.unresolved += 1,
                }
            }
        }
        if report.unresolved > 0 {
            warn!(unresolved = report.unresolved, "Cited dataset short names not found");
        }

        info!(edges = edges.len(), "Loading publication dataset links");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Edge(EdgeKind::UsesDataset), &edges.records)
                .await?,
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Publication → Publication
// ---------------------------------------------------------------------------

pub struct CitationStage;

#[async_trait]
impl Stage for CitationStage {
    fn id(&self) -> StageId {
        StageId::PublicationCitations
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_citations(&ctx.paths.citations_json)?;
        let resolution = CitationResolver::new(ctx.store.as_ref(), ctx.settings.unresolved_citations)
            .resolve(&loaded.items)
            .await?;

        for pair in &resolution.unresolved {
            warn!(
                offset = pair.offset,
                citing = pair.citing.as_str(),
                cited = pair.cited.as_str(),
                missing = ?pair.missing,
                "Unresolved citation"
            );
        }

        let mut report = StageReport {
            malformed: loaded.skipped_count() + resolution.malformed.len() as u64,
            unresolved: resolution.unresolved.len() as u64,
            ..Default::default()
        };

        let executor = ctx.executor();
        if !resolution.placeholders.is_empty() {
            report.absorb(
                executor
                    .upsert(EntityType::Node(NodeKind::Publication), &resolution.placeholders)
                    .await?,
            );
        }
        report.absorb(executor.upsert(EntityType::Edge(EdgeKind::Cites), &resolution.edges).await?);
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Publication → applied research area
// ---------------------------------------------------------------------------

pub struct ResearchAreaStage {
    classifier: Arc<dyn ResearchAreaClassifier>,
}

impl ResearchAreaStage {
    pub fn new(classifier: Arc<dyn ResearchAreaClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage for ResearchAreaStage {
    fn id(&self) -> StageId {
        StageId::PublicationResearchArea
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let loaded = read_publications(&ctx.paths.publications_json)?;
        let mut report = StageReport {
            malformed: loaded.skipped_count(),
            ..Default::default()
        };

        let mut areas: HashMap<String, Option<String>> = HashMap::new();
        let mut edges = EdgeSet::default();
        for publication in &loaded.items {
            let Some(source) = normalize(&publication.doi).global_id() else {
                report.malformed += 1;
                continue;
            };
            let label = publication
                .abstract_text
                .as_deref()
                .and_then(|text| self.classifier.classify(text));
            let Some(NormalizedKey::Key(key)) = label.as_deref().map(normalize) else {
                report.unresolved += 1;
                continue;
            };

            if !areas.contains_key(&key) {
                let found = ctx
                    .store
                    .find_by_natural_key(NodeKind::ScienceKeyword, NAME_KEY, &NormalizedKey::Key(key.clone()))
                    .await?
                    .map(|n| n.global_id);
                if found.is_none() {
                    warn!(area = key.as_str(), "Research area has no keyword node");
                }
                areas.insert(key.clone(), found);
            }
            match areas.get(&key).cloned().flatten() {
                Some(target) => edges.add(source, target),
                None => report.unresolved += 1,
            }
        }

        info!(edges = edges.len(), unresolved = report.unresolved, "Loading research area links");
        report.absorb(
            ctx.executor()
                .upsert(EntityType::Edge(EdgeKind::AppliesTo), &edges.records)
                .await?,
        );
        Ok(report)
    }
}
