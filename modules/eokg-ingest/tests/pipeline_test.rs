// Full pipeline runs against the in-memory store.
//
// Catalog and analytics are test doubles; every file source is a fixture in a
// temp directory. Run with: cargo test -p eokg-ingest --test pipeline_test

use std::path::Path;
use std::sync::Arc;

use eokg_common::{global_id, EdgeKind, IngestSettings, NodeKind, NodeRef, PathsConfig, PropValue, StagesConfig};
use eokg_graph::MemoryStore;
use eokg_ingest::sources::metadata::CollectionRecord;
use eokg_ingest::stages::compute::PAGE_RANK_PROPERTY;
use eokg_ingest::testing::{collection_json, write_file, FakeAnalytics, FakeCatalog};
use eokg_ingest::{pipeline, Collaborators, LexiconClassifier, Orchestrator, StageContext, StageId, StageStatus};

fn paths(dir: &Path) -> PathsConfig {
    PathsConfig {
        source_dois: dir.join("dois.csv"),
        dataset_metadata_dir: dir.join("metadata"),
        keywords_csv: dir.join("keywords.csv"),
        publications_json: dir.join("publications.json"),
        citations_json: dir.join("citations.json"),
    }
}

fn write_sources(dir: &Path) {
    write_file(
        &dir.join("keywords.csv"),
        "Term,Parent\nATMOSPHERE,\nAEROSOLS,ATMOSPHERE\nApplied Research Areas,\nWildfires,Applied Research Areas\n",
    );
    write_file(
        &dir.join("publications.json"),
        r#"[{"DOI": "10.2/P1", "Title": "Smoke plumes", "Year": 2019,
             "Abstract": "Wildfire smoke transport observed from orbit.",
             "tags": [{"tag": "doi:10.5067/MOD08"}], "Cited-References": [{"Shortname": "AIRX3"}]},
            {"DOI": "10.2/P2", "Title": "Aerosol climatology", "Year": "2020"}]"#,
    );
    write_file(
        &dir.join("citations.json"),
        r#"[{"citing": "10.2/P1", "cited": "10.2/P2"}, {"citing": "10.2/P2", "cited": "10.9/ELSEWHERE"}]"#,
    );
}

fn catalog_records() -> Vec<CollectionRecord> {
    let mut modis: serde_json::Value = serde_json::from_str(&collection_json(
        "10.5067/MOD08",
        "MOD08_M3",
        &["LAADS"],
        &[("Terra", &["MODIS"]), ("Aqua", &["MODIS"])],
    ))
    .unwrap();
    modis["ScienceKeywords"] = serde_json::json!([
        {"Category": "EARTH SCIENCE", "Topic": "ATMOSPHERE", "Term": "AEROSOLS"}
    ]);
    let airs = collection_json("10.5067/AIRX3", "AIRX3", &["GES_DISC"], &[("Aqua", &["AIRS"])]);

    vec![
        serde_json::from_value(modis).unwrap(),
        serde_json::from_str(&airs).unwrap(),
    ]
}

fn publication(doi: &str) -> NodeRef {
    NodeRef {
        kind: NodeKind::Publication,
        global_id: global_id(doi),
    }
}

fn orchestrator(stages: StagesConfig) -> Orchestrator {
    let analytics = FakeAnalytics::default()
        .with_score(publication("10.2/p1"), 0.8)
        .with_score(publication("10.2/p2"), 0.2);
    let collaborators = Collaborators {
        catalog: Arc::new(FakeCatalog::paged(catalog_records(), 1)),
        classifier: Arc::new(LexiconClassifier),
        analytics: Some(Arc::new(analytics)),
    };
    Orchestrator::new(pipeline(collaborators), stages).unwrap()
}

fn settings() -> IngestSettings {
    IngestSettings {
        batch_size: 2,
        embedding_dimension: 8,
        ..Default::default()
    }
}

#[tokio::test]
async fn full_run_builds_the_graph() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let store = MemoryStore::new();

    let summary = orchestrator(StagesConfig::default())
        .run(StageContext::new(Arc::new(store.clone()), settings(), paths(dir.path())))
        .await;

    assert!(summary.is_clean(), "{summary}");
    assert_eq!(summary.outcomes.len(), StageId::ALL.len());

    assert_eq!(store.nodes_of(NodeKind::Dataset).len(), 2);
    assert_eq!(store.nodes_of(NodeKind::Platform).len(), 2);
    assert_eq!(store.nodes_of(NodeKind::Instrument).len(), 2);
    assert_eq!(store.nodes_of(NodeKind::Publication).len(), 2);

    let mod08 = global_id("10.5067/mod08");
    let airx3 = global_id("10.5067/airx3");
    assert!(store.edge_exists(EdgeKind::HasDataset, &global_id("laads"), &mod08));
    assert!(store.edge_exists(EdgeKind::HasPlatform, &airx3, &global_id("aqua")));
    assert!(store.edge_exists(EdgeKind::HasInstrument, &global_id("aqua"), &global_id("airs")));
    assert!(store.edge_exists(EdgeKind::HasScienceKeyword, &mod08, &global_id("atmosphere > aerosols")));
    assert!(store.edge_exists(EdgeKind::UsesDataset, &global_id("10.2/p1"), &mod08));
    assert!(store.edge_exists(EdgeKind::UsesDataset, &global_id("10.2/p1"), &airx3));
    assert!(store.edge_exists(EdgeKind::Cites, &global_id("10.2/p1"), &global_id("10.2/p2")));
    assert!(store.edge_exists(
        EdgeKind::AppliesTo,
        &global_id("10.2/p1"),
        &global_id("applied research areas > wildfires"),
    ));

    let citations = summary.outcome(StageId::PublicationCitations).unwrap();
    assert_eq!(citations.report.created, 1);
    assert_eq!(citations.report.unresolved, 1);

    let p1 = store.node(NodeKind::Publication, &global_id("10.2/p1")).unwrap();
    assert_eq!(p1[PAGE_RANK_PROPERTY], PropValue::Float(0.8));
}

#[tokio::test]
async fn second_run_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let store = MemoryStore::new();
    let ctx = || StageContext::new(Arc::new(store.clone()), settings(), paths(dir.path()));

    let first = orchestrator(StagesConfig::default()).run(ctx()).await;
    let (nodes, edges) = (store.total_nodes(), store.total_edges());
    assert!(first.total_created() > 0);

    let second = orchestrator(StagesConfig::default()).run(ctx()).await;
    assert!(second.is_clean(), "{second}");
    assert_eq!(second.total_created(), 0, "{second}");
    assert_eq!(store.total_nodes(), nodes);
    assert_eq!(store.total_edges(), edges);
    assert_eq!(second.outcome(StageId::Collect).unwrap().report.matched, 2);
}

#[tokio::test]
async fn disabled_stage_leaves_its_edges_out() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let store = MemoryStore::new();
    let mut stages = StagesConfig::default();
    stages.set("publication_citations", false);

    let summary = orchestrator(stages)
        .run(StageContext::new(Arc::new(store.clone()), settings(), paths(dir.path())))
        .await;

    assert_eq!(summary.status(StageId::PublicationCitations), Some(&StageStatus::Disabled));
    assert_eq!(summary.status(StageId::PageRank), Some(&StageStatus::Succeeded));
    assert!(store.edges_of(EdgeKind::Cites).is_empty());
}

#[tokio::test]
async fn missing_publications_file_blocks_only_its_dependents() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    std::fs::remove_file(dir.path().join("publications.json")).unwrap();
    let store = MemoryStore::new();

    let summary = orchestrator(StagesConfig::default())
        .run(StageContext::new(Arc::new(store.clone()), settings(), paths(dir.path())))
        .await;

    assert!(matches!(summary.status(StageId::PublicationNodes), Some(StageStatus::Failed(_))));
    assert_eq!(
        summary.status(StageId::PublicationCitations),
        Some(&StageStatus::Blocked { by: StageId::PublicationNodes })
    );
    assert_eq!(summary.status(StageId::DatasetPlatform), Some(&StageStatus::Succeeded));
    assert_eq!(store.nodes_of(NodeKind::Dataset).len(), 2);
}
