//! Citation Resolver: raw (citing, cited) DOI pairs to `CITES` edge records.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use eokg_common::{
    global_id, normalize, NodeKind, NormalizedKey, NormalizedRecord, PropValue, Properties,
    UnresolvedPolicy, DOI,
};
use eokg_graph::{GraphStore, StoreError};

use crate::sources::citations::{CitedMetadata, RawCitation};

/// Which end of a pair could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSide {
    Citing,
    Cited,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedCitation {
    pub offset: usize,
    pub citing: String,
    pub cited: String,
    pub missing: MissingSide,
}

#[derive(Debug, Default)]
pub struct CitationResolution {
    /// `CITES` edges, citing → cited, deduplicated.
    pub edges: Vec<NormalizedRecord>,
    /// Minimal Publication nodes to create before the edges (placeholder policy only).
    pub placeholders: Vec<NormalizedRecord>,
    pub unresolved: Vec<UnresolvedCitation>,
    pub self_citations: u64,
    pub duplicates: u64,
    /// Offsets of pairs with an empty identifier on either side.
    pub malformed: Vec<usize>,
}

pub struct CitationResolver<'a> {
    store: &'a dyn GraphStore,
    policy: UnresolvedPolicy,
    known: HashMap<String, Option<String>>,
}

impl<'a> CitationResolver<'a> {
    pub fn new(store: &'a dyn GraphStore, policy: UnresolvedPolicy) -> Self {
        Self {
            store,
            policy,
            known: HashMap::new(),
        }
    }

    /// globalId of the loaded Publication with this normalized DOI.
    async fn lookup(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(hit) = self.known.get(key) {
            return Ok(hit.clone());
        }
        let found = self
            .store
            .find_by_natural_key(NodeKind::Publication, DOI, &NormalizedKey::Key(key.to_string()))
            .await?
            .map(|n| n.global_id);
        self.known.insert(key.to_string(), found.clone());
        Ok(found)
    }

    pub async fn resolve(&mut self, pairs: &[RawCitation]) -> Result<CitationResolution, StoreError> {
        let mut out = CitationResolution::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut placeholders: HashMap<String, usize> = HashMap::new();

        for (offset, pair) in pairs.iter().enumerate() {
            let (NormalizedKey::Key(citing), NormalizedKey::Key(cited)) = (normalize(&pair.citing), normalize(&pair.cited)) else {
                debug!(offset, "Citation pair with empty identifier");
                out.malformed.push(offset);
                continue;
            };

            if citing == cited {
                out.self_citations += 1;
                continue;
            }
            if !seen.insert((citing.clone(), cited.clone())) {
                out.duplicates += 1;
                continue;
            }

            let citing_id = self.lookup(&citing).await?;
            let cited_id = self.lookup(&cited).await?;

            let (citing_id, cited_id) = match (citing_id, cited_id, self.policy) {
                (Some(a), Some(b), _) => (a, b),
                (a, b, UnresolvedPolicy::Drop) => {
                    let missing = match (a.is_none(), b.is_none()) {
                        (true, true) => MissingSide::Both,
                        (true, false) => MissingSide::Citing,
                        _ => MissingSide::Cited,
                    };
                    out.unresolved.push(UnresolvedCitation {
                        offset,
                        citing: pair.citing.clone(),
                        cited: pair.cited.clone(),
                        missing,
                    });
                    continue;
                }
                (a, b, UnresolvedPolicy::Placeholder) => {
                    let a = a.unwrap_or_else(|| add_placeholder(&mut out, &mut placeholders, &citing, None));
                    let b = b.unwrap_or_else(|| {
                        add_placeholder(&mut out, &mut placeholders, &cited, pair.cited_metadata.as_ref())
                    });
                    (a, b)
                }
            };

            out.edges.push(NormalizedRecord::edge(citing_id, cited_id));
        }

        info!(
            pairs = pairs.len(),
            edges = out.edges.len(),
            placeholders = out.placeholders.len(),
            unresolved = out.unresolved.len(),
            self_citations = out.self_citations,
            duplicates = out.duplicates,
            malformed = out.malformed.len(),
            "Citations resolved"
        );
        Ok(out)
    }
}

/// Queue a placeholder Publication for `doi`, or fill gaps in one already queued.
fn add_placeholder(
    out: &mut CitationResolution,
    index: &mut HashMap<String, usize>,
    doi: &str,
    metadata: Option<&CitedMetadata>,
) -> String {
    let gid = global_id(doi);
    let slot = *index.entry(gid.clone()).or_insert_with(|| {
        let props: Properties = [
            (DOI.to_string(), PropValue::from(doi)),
            ("placeholder".to_string(), PropValue::Bool(true)),
        ]
        .into_iter()
        .collect();
        out.placeholders.push(NormalizedRecord::node(gid.clone(), props));
        out.placeholders.len() - 1
    });

    if let Some(meta) = metadata {
        let props = &mut out.placeholders[slot].properties;
        let mut fill = |name: &str, value: PropValue| {
            if !value.is_null() && !props.contains_key(name) {
                props.insert(name.to_string(), value);
            }
        };
        fill("title", meta.title.clone().into());
        fill("year", meta.year.into());
        fill("abstract", meta.abstract_text.clone().into());
        if !meta.authors.is_empty() {
            fill("authors", meta.authors.clone().into());
        }
    }
    gid
}

#[cfg(test)]
mod tests {
    use super::*;
    use eokg_common::{properties, EntityType, RecordKey};
    use eokg_graph::{BatchUpsertExecutor, MemoryStore};

    async fn store_with(dois: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let records: Vec<_> = dois
            .iter()
            .map(|d| {
                let key = normalize(d).as_str().unwrap().to_string();
                NormalizedRecord::node(global_id(&key), properties([(DOI, key)]))
            })
            .collect();
        BatchUpsertExecutor::new(&store, 100)
            .upsert(EntityType::Node(NodeKind::Publication), &records)
            .await
            .unwrap();
        store
    }

    fn edge_ends(record: &NormalizedRecord) -> (String, String) {
        match &record.key {
            RecordKey::Edge { source, target } => (source.to_string(), target.to_string()),
            RecordKey::Node(_) => panic!("expected an edge"),
        }
    }

    #[tokio::test]
    async fn variant_spellings_yield_one_edge() {
        let store = store_with(&["10.1/X", "10.1/Y"]).await;
        let pairs = vec![
            RawCitation::new("10.1/X", "10.1/Y"),
            RawCitation::new("https://doi.org/10.1/x", "10.1/Y"),
        ];
        let result = CitationResolver::new(&store, UnresolvedPolicy::Drop)
            .resolve(&pairs)
            .await
            .unwrap();

        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.duplicates, 1);
        assert_eq!(edge_ends(&result.edges[0]), (global_id("10.1/x"), global_id("10.1/y")));
    }

    #[tokio::test]
    async fn self_citation_is_filtered_and_counted() {
        let store = store_with(&["10.1/X"]).await;
        let result = CitationResolver::new(&store, UnresolvedPolicy::Drop)
            .resolve(&[RawCitation::new("10.1/X", "10.1/X")])
            .await
            .unwrap();
        assert!(result.edges.is_empty());
        assert_eq!(result.self_citations, 1);
    }

    #[tokio::test]
    async fn drop_policy_reports_unresolved() {
        let store = store_with(&["10.1/X"]).await;
        let result = CitationResolver::new(&store, UnresolvedPolicy::Drop)
            .resolve(&[RawCitation::new("10.1/X", "10.1/missing")])
            .await
            .unwrap();
        assert!(result.edges.is_empty());
        assert!(result.placeholders.is_empty());
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].missing, MissingSide::Cited);
    }

    #[tokio::test]
    async fn placeholder_policy_creates_minimal_node_and_edge() {
        let store = store_with(&["10.1/X"]).await;
        let mut pair = RawCitation::new("10.1/X", "10.1/missing");
        pair.cited_metadata = Some(CitedMetadata {
            title: Some("Cited work".into()),
            ..Default::default()
        });

        let result = CitationResolver::new(&store, UnresolvedPolicy::Placeholder)
            .resolve(&[pair])
            .await
            .unwrap();

        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.placeholders.len(), 1);
        assert!(result.unresolved.is_empty());

        let placeholder = &result.placeholders[0];
        assert_eq!(placeholder.properties[DOI], PropValue::from("10.1/missing"));
        assert_eq!(placeholder.properties["placeholder"], PropValue::Bool(true));
        assert_eq!(placeholder.properties["title"], PropValue::from("Cited work"));
        assert!(!placeholder.properties.contains_key("year"));
    }

    #[tokio::test]
    async fn cycles_are_kept() {
        let store = store_with(&["10.1/A", "10.1/B"]).await;
        let result = CitationResolver::new(&store, UnresolvedPolicy::Drop)
            .resolve(&[RawCitation::new("10.1/A", "10.1/B"), RawCitation::new("10.1/B", "10.1/A")])
            .await
            .unwrap();
        assert_eq!(result.edges.len(), 2);
    }

    #[tokio::test]
    async fn empty_identifiers_are_malformed() {
        let store = MemoryStore::new();
        let result = CitationResolver::new(&store, UnresolvedPolicy::Placeholder)
            .resolve(&[RawCitation::new("  ", "10.1/Y")])
            .await
            .unwrap();
        assert_eq!(result.malformed, vec![0]);
        assert!(result.placeholders.is_empty());
    }
}
