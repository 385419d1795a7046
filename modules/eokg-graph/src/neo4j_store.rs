use async_trait::async_trait;
use neo4rs::{query, Query, Txn};
use tracing::{debug, warn};

use eokg_common::{EdgeKind, NodeKind, NodeRef, NormalizedKey, PropValue, Properties};

use crate::store::{GraphStore, StoreError, StoreTxn, WriteOutcome};
use crate::GraphClient;

/// Neo4j-backed store. Every write is a conditional MERGE keyed on `globalId`.
#[derive(Clone)]
pub struct Neo4jStore {
    client: GraphClient,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn single_count(&self, cypher: &str) -> Result<u64, StoreError> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        let mut count = 0i64;
        while let Some(row) = stream.next().await? {
            count = row.get("c").unwrap_or(0);
        }
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_unique_constraint(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
        let property = checked_name(property)?;
        let label = kind.label();
        let cypher = format!(
            "CREATE CONSTRAINT {}_{}_unique IF NOT EXISTS FOR (n:{label}) REQUIRE n.`{property}` IS UNIQUE",
            label.to_lowercase(),
            property.to_lowercase(),
        );
        run_ignoring_exists(&self.client.graph, &cypher).await
    }

    async fn ensure_index(&self, kind: NodeKind, property: &str) -> Result<(), StoreError> {
        let property = checked_name(property)?;
        let label = kind.label();
        let cypher = format!(
            "CREATE INDEX {}_{}_lookup IF NOT EXISTS FOR (n:{label}) ON (n.`{property}`)",
            label.to_lowercase(),
            property.to_lowercase(),
        );
        run_ignoring_exists(&self.client.graph, &cypher).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let txn = self.client.graph.start_txn().await?;
        Ok(Box::new(Neo4jTxn { txn }))
    }

    async fn find_all_by_natural_key(
        &self,
        kind: NodeKind,
        property: &str,
        key: &NormalizedKey,
    ) -> Result<Vec<NodeRef>, StoreError> {
        let Some(key) = key.as_str() else {
            return Ok(Vec::new());
        };
        let property = checked_name(property)?;
        let q = query(&format!(
            "MATCH (n:{label}) WHERE n.`{property}` = $key
             RETURN n.globalId AS globalId ORDER BY globalId",
            label = kind.label(),
        ))
        .param("key", key);

        let mut stream = self.client.graph.execute(q).await?;
        let mut found = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Ok(global_id) = row.get::<String>("globalId") {
                found.push(NodeRef { kind, global_id });
            }
        }
        Ok(found)
    }

    async fn lacks_property(&self, kind: NodeKind, global_id: &str, property: &str) -> Result<bool, StoreError> {
        let property = checked_name(property)?;
        let q = query(&format!(
            "MATCH (n:{label} {{globalId: $globalId}}) WHERE n.`{property}` IS NULL RETURN count(n) AS c",
            label = kind.label(),
        ))
        .param("globalId", global_id);

        let mut stream = self.client.graph.execute(q).await?;
        let mut count = 0i64;
        while let Some(row) = stream.next().await? {
            count = row.get("c").unwrap_or(0);
        }
        Ok(count > 0)
    }

    async fn count_nodes(&self, kind: NodeKind) -> Result<u64, StoreError> {
        self.single_count(&format!("MATCH (n:{}) RETURN count(n) AS c", kind.label()))
            .await
    }

    async fn count_edges(&self, kind: EdgeKind) -> Result<u64, StoreError> {
        let d = kind.descriptor();
        self.single_count(&format!(
            "MATCH (:{})-[r:{}]->(:{}) RETURN count(r) AS c",
            d.source.label(),
            d.rel_type,
            d.target.label()
        ))
        .await
    }
}

/// One open Neo4j transaction. Dropping it without commit rolls back server-side.
pub struct Neo4jTxn {
    txn: Txn,
}

impl Neo4jTxn {
    /// Run a statement that returns at most one row and read a single column from it.
    async fn fetch_one<T>(&mut self, q: Query, column: &str) -> Result<Option<T>, StoreError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut stream = self.txn.execute(q).await?;
        let mut value = None;
        while let Some(row) = stream.next(self.txn.handle()).await? {
            value = row.get::<T>(column).ok();
        }
        Ok(value)
    }
}

#[async_trait]
impl StoreTxn for Neo4jTxn {
    async fn upsert_node(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        let (set_clause, params) = set_clause("n", properties)?;
        let cypher = format!(
            "OPTIONAL MATCH (existing:{label} {{globalId: $globalId}})
             WITH count(existing) = 0 AS created
             MERGE (n:{label} {{globalId: $globalId}})
             {set_clause}
             RETURN created",
            label = kind.label(),
        );
        let q = bind(query(&cypher).param("globalId", global_id), params);

        match self.fetch_one::<bool>(q, "created").await? {
            Some(true) => Ok(WriteOutcome::Created),
            Some(false) => Ok(WriteOutcome::Matched),
            None => Err(StoreError::Query(format!(
                "MERGE on {} {global_id} returned no row",
                kind.label()
            ))),
        }
    }

    async fn upsert_edge(
        &mut self,
        kind: EdgeKind,
        source: &str,
        target: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        let d = kind.descriptor();
        let (set_clause, params) = set_clause("r", properties)?;
        let cypher = format!(
            "MATCH (a:{src} {{globalId: $source}})
             MATCH (b:{dst} {{globalId: $target}})
             OPTIONAL MATCH (a)-[existing:{rel}]->(b)
             WITH a, b, count(existing) = 0 AS created
             MERGE (a)-[r:{rel}]->(b)
             {set_clause}
             RETURN created",
            src = d.source.label(),
            dst = d.target.label(),
            rel = d.rel_type,
        );
        let q = bind(
            query(&cypher).param("source", source).param("target", target),
            params,
        );

        match self.fetch_one::<bool>(q, "created").await? {
            Some(true) => Ok(WriteOutcome::Created),
            Some(false) => Ok(WriteOutcome::Matched),
            None => {
                debug!(rel = d.rel_type, source, target, "Edge endpoint missing");
                Ok(WriteOutcome::Missing)
            }
        }
    }

    async fn set_properties(
        &mut self,
        kind: NodeKind,
        global_id: &str,
        properties: &Properties,
    ) -> Result<WriteOutcome, StoreError> {
        let (set_clause, params) = set_clause("n", properties)?;
        let cypher = format!(
            "MATCH (n:{label} {{globalId: $globalId}})
             {set_clause}
             RETURN count(n) AS matched",
            label = kind.label(),
        );
        let q = bind(query(&cypher).param("globalId", global_id), params);

        match self.fetch_one::<i64>(q, "matched").await? {
            Some(n) if n > 0 => Ok(WriteOutcome::Matched),
            _ => Ok(WriteOutcome::Missing),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

/// Property names are interpolated into Cypher, so only plain identifiers pass.
fn checked_name(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::Malformed(format!("invalid property name {name:?}")))
    }
}

/// Build `SET var.p = $p_p, ...` for the non-null properties.
fn set_clause<'a>(
    var: &str,
    properties: &'a Properties,
) -> Result<(String, Vec<(String, &'a PropValue)>), StoreError> {
    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for (name, value) in properties {
        if value.is_null() {
            continue;
        }
        let name = checked_name(name)?;
        let param = format!("p_{name}");
        assignments.push(format!("{var}.`{name}` = ${param}"));
        params.push((param, value));
    }
    if assignments.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!("SET {}", assignments.join(", ")), params))
    }
}

fn bind(mut q: Query, params: Vec<(String, &PropValue)>) -> Query {
    for (name, value) in params {
        q = match value {
            PropValue::Null => q,
            PropValue::Bool(b) => q.param(&name, *b),
            PropValue::Int(i) => q.param(&name, *i),
            PropValue::Float(f) => q.param(&name, *f),
            PropValue::Text(s) => q.param(&name, s.as_str()),
            PropValue::TextList(l) => q.param(&name, l.clone()),
            PropValue::FloatList(l) => q.param(&name, l.clone()),
        };
    }
    q
}

/// Run a schema statement, ignoring errors that indicate it already exists.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), StoreError> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}
