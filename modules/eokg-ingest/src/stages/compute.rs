//! Analytics stages. Scores come from the analytics engine and are written
//! back as node properties through the batch executor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use eokg_common::{properties, EntityType, NodeKind, NodeRef, NormalizedRecord, PropValue};
use eokg_graph::{GraphAnalytics, Projection};

use super::{Stage, StageContext, StageError, StageId, StageReport};

pub const PAGE_RANK_PROPERTY: &str = "pagerank_publication_dataset";
pub const EMBEDDING_PROPERTY: &str = "fastrp_embedding_with_labels";

/// Property-update records grouped by label, in `globalId` order.
fn property_updates<V: Into<PropValue>>(
    values: HashMap<NodeRef, V>,
    property: &str,
) -> BTreeMap<NodeKind, Vec<NormalizedRecord>> {
    let mut sorted: Vec<(NodeRef, V)> = values.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut grouped: BTreeMap<NodeKind, Vec<NormalizedRecord>> = BTreeMap::new();
    for (node, value) in sorted {
        grouped
            .entry(node.kind)
            .or_default()
            .push(NormalizedRecord::node(node.global_id, properties([(property, value)])));
    }
    grouped
}

async fn persist(
    ctx: &StageContext,
    updates: BTreeMap<NodeKind, Vec<NormalizedRecord>>,
) -> Result<StageReport, StageError> {
    let executor = ctx.executor();
    let mut report = StageReport::default();
    for (kind, records) in updates {
        report.absorb(executor.upsert(EntityType::NodeProperties(kind), &records).await?);
    }
    Ok(report)
}

pub struct PageRankStage {
    analytics: Arc<dyn GraphAnalytics>,
}

impl PageRankStage {
    pub fn new(analytics: Arc<dyn GraphAnalytics>) -> Self {
        Self { analytics }
    }

    pub fn projection() -> Projection {
        Projection::new("publicationDatasetGraph").nodes(&[NodeKind::Publication, NodeKind::Dataset])
    }
}

#[async_trait]
impl Stage for PageRankStage {
    fn id(&self) -> StageId {
        StageId::PageRank
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let scores = self
            .analytics
            .page_rank(&Self::projection())
            .await
            .map_err(|e| StageError::Analytics(e.to_string()))?;
        info!(nodes = scores.len(), "PageRank scores computed");
        persist(ctx, property_updates(scores, PAGE_RANK_PROPERTY)).await
    }
}

pub struct FastRpStage {
    analytics: Arc<dyn GraphAnalytics>,
}

impl FastRpStage {
    pub fn new(analytics: Arc<dyn GraphAnalytics>) -> Self {
        Self { analytics }
    }

    pub fn projection() -> Projection {
        Projection::new("graphEmbedding")
    }
}

#[async_trait]
impl Stage for FastRpStage {
    fn id(&self) -> StageId {
        StageId::FastRp
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let dimensions = ctx.settings.embedding_dimension;
        let vectors = self
            .analytics
            .embedding(&Self::projection(), dimensions)
            .await
            .map_err(|e| StageError::Analytics(e.to_string()))?;
        info!(nodes = vectors.len(), dimensions, "FastRP embeddings computed");
        persist(ctx, property_updates(vectors, EMBEDDING_PROPERTY)).await
    }
}
