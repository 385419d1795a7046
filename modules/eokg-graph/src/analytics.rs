//! Graph algorithms run in Neo4j GDS. Scores are streamed back rather than
//! written in-database so the caller can persist them through the batch executor.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::query;
use tracing::{info, warn};

use eokg_common::{EdgeKind, NodeKind, NodeRef};

use crate::store::StoreError;
use crate::GraphClient;

/// A named in-memory GDS projection. Empty kind lists project everything.
#[derive(Debug, Clone)]
pub struct Projection {
    pub name: String,
    pub node_kinds: Vec<NodeKind>,
    pub edge_kinds: Vec<EdgeKind>,
}

impl Projection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_kinds: Vec::new(),
            edge_kinds: Vec::new(),
        }
    }

    pub fn nodes(mut self, kinds: &[NodeKind]) -> Self {
        self.node_kinds = kinds.to_vec();
        self
    }

    pub fn edges(mut self, kinds: &[EdgeKind]) -> Self {
        self.edge_kinds = kinds.to_vec();
        self
    }

    fn node_projection(&self) -> String {
        if self.node_kinds.is_empty() {
            "'*'".to_string()
        } else {
            let labels: Vec<String> = self.node_kinds.iter().map(|k| format!("'{}'", k.label())).collect();
            format!("[{}]", labels.join(", "))
        }
    }

    fn edge_projection(&self) -> String {
        if self.edge_kinds.is_empty() {
            "'*'".to_string()
        } else {
            let types: Vec<String> = self.edge_kinds.iter().map(|k| format!("'{}'", k.rel_type())).collect();
            format!("[{}]", types.join(", "))
        }
    }
}

#[async_trait]
pub trait GraphAnalytics: Send + Sync {
    async fn page_rank(&self, projection: &Projection) -> Result<HashMap<NodeRef, f64>, StoreError>;

    async fn embedding(
        &self,
        projection: &Projection,
        dimensions: usize,
    ) -> Result<HashMap<NodeRef, Vec<f64>>, StoreError>;
}

pub struct GdsAnalytics {
    client: GraphClient,
}

impl GdsAnalytics {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn drop_projection(&self, name: &str) -> Result<(), StoreError> {
        let q = query("CALL gds.graph.drop($name, false) YIELD graphName RETURN graphName")
            .param("name", name);
        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn project(&self, projection: &Projection) -> Result<(), StoreError> {
        self.drop_projection(&projection.name).await?;

        let cypher = format!(
            "CALL gds.graph.project($name, {}, {})
             YIELD graphName, nodeCount, relationshipCount
             RETURN nodeCount, relationshipCount",
            projection.node_projection(),
            projection.edge_projection(),
        );
        let mut stream = self
            .client
            .graph
            .execute(query(&cypher).param("name", projection.name.as_str()))
            .await?;
        while let Some(row) = stream.next().await? {
            let nodes: i64 = row.get("nodeCount").unwrap_or(0);
            let rels: i64 = row.get("relationshipCount").unwrap_or(0);
            info!(projection = %projection.name, nodes, relationships = rels, "Graph projection created");
        }
        Ok(())
    }

    /// Drop the projection whether or not `result` succeeded, keeping the first error.
    async fn finish<T>(&self, projection: &Projection, result: Result<T, StoreError>) -> Result<T, StoreError> {
        let dropped = self.drop_projection(&projection.name).await;
        if let Err(e) = &dropped {
            warn!(projection = %projection.name, error = %e, "Failed to drop projection");
        }
        let value = result?;
        dropped?;
        Ok(value)
    }

    async fn stream_page_rank(&self, projection: &Projection) -> Result<HashMap<NodeRef, f64>, StoreError> {
        let q = query(
            "CALL gds.pageRank.stream($name)
             YIELD nodeId, score
             WITH gds.util.asNode(nodeId) AS n, score
             RETURN labels(n) AS labels, n.globalId AS globalId, score",
        )
        .param("name", projection.name.as_str());

        let mut scores = HashMap::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let Some(node) = node_ref(&row) else { continue };
            let score: f64 = row.get("score").map_err(|e| StoreError::Query(e.to_string()))?;
            scores.insert(node, score);
        }
        Ok(scores)
    }

    async fn stream_embedding(
        &self,
        projection: &Projection,
        dimensions: usize,
    ) -> Result<HashMap<NodeRef, Vec<f64>>, StoreError> {
        let q = query(
            "CALL gds.fastRP.stream($name, {
                embeddingDimension: $dimensions,
                iterationWeights: [0.8, 1.0, 1.0, 1.0],
                nodeSelfInfluence: 1.0
             })
             YIELD nodeId, embedding
             WITH gds.util.asNode(nodeId) AS n, embedding
             RETURN labels(n) AS labels, n.globalId AS globalId, embedding",
        )
        .param("name", projection.name.as_str())
        .param("dimensions", dimensions as i64);

        let mut vectors = HashMap::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let Some(node) = node_ref(&row) else { continue };
            let embedding: Vec<f64> = row
                .get("embedding")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            vectors.insert(node, embedding);
        }
        Ok(vectors)
    }
}

/// Nodes outside the ingest schema (no known label or no globalId) are ignored.
fn node_ref(row: &neo4rs::Row) -> Option<NodeRef> {
    let labels: Vec<String> = row.get("labels").ok()?;
    let global_id: String = row.get("globalId").ok()?;
    let kind = labels.iter().find_map(|l| NodeKind::from_label(l))?;
    Some(NodeRef { kind, global_id })
}

#[async_trait]
impl GraphAnalytics for GdsAnalytics {
    async fn page_rank(&self, projection: &Projection) -> Result<HashMap<NodeRef, f64>, StoreError> {
        self.project(projection).await?;
        let result = self.stream_page_rank(projection).await;
        self.finish(projection, result).await
    }

    async fn embedding(
        &self,
        projection: &Projection,
        dimensions: usize,
    ) -> Result<HashMap<NodeRef, Vec<f64>>, StoreError> {
        self.project(projection).await?;
        let result = self.stream_embedding(projection, dimensions).await;
        self.finish(projection, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_projection_means_everything() {
        let p = Projection::new("graphEmbedding");
        assert_eq!(p.node_projection(), "'*'");
        assert_eq!(p.edge_projection(), "'*'");
    }

    #[test]
    fn labelled_projection_lists_labels() {
        let p = Projection::new("publicationDatasetGraph")
            .nodes(&[NodeKind::Publication, NodeKind::Dataset])
            .edges(&[EdgeKind::Cites]);
        assert_eq!(p.node_projection(), "['Publication', 'Dataset']");
        assert_eq!(p.edge_projection(), "['CITES']");
    }
}
