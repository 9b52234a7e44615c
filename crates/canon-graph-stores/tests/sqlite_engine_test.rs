//! The engine running on the SQLite store, across a reopen.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use canon_core::config::StoreConfig;
use canon_core::{
    CanonConfig, CanonEngine, CanonResult, Embedder, EntityCandidate, ExtractionBatch,
    HeuristicOracle, RelationCandidate,
};
use canon_graph_stores::GraphStoreFactory;

/// Character histogram; identical text gives identical vectors.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, text: &str) -> CanonResult<Vec<f32>> {
        let mut vector = vec![0.0; 27];
        for c in text.to_lowercase().chars() {
            match c {
                'a'..='z' => vector[(c as u8 - b'a') as usize] += 1.0,
                _ => vector[26] += 0.1,
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        27
    }

    fn model_name(&self) -> &str {
        "letters"
    }
}

fn engine_at(path: &Path) -> CanonEngine {
    let store = StoreConfig {
        path: path.to_path_buf(),
    };
    let handles = GraphStoreFactory::open(&store).unwrap();
    CanonEngine::builder(CanonConfig {
        store,
        ..Default::default()
    })
    .stores(handles.graph)
    .vector_index(handles.vectors)
    .embedder(Arc::new(LetterEmbedder))
    .oracle(Arc::new(HeuristicOracle::default()))
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_resolution_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    let (alice, acme) = {
        let engine = engine_at(&path);
        let report = engine
            .ingest(
                ExtractionBatch::new()
                    .with_document("doc-1")
                    .entity(EntityCandidate::new("Alice Smith", "person", "engineer at acme"))
                    .entity(EntityCandidate::new("Acme", "organization", "anvil maker"))
                    .relation(RelationCandidate::new("Alice Smith", "works_at", "Acme")),
            )
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.relations_created.len(), 1);
        (
            report.entity_for("alice smith").unwrap(),
            report.entity_for("acme").unwrap(),
        )
    };

    let engine = engine_at(&path);
    let resolved = engine
        .resolve_entity(&EntityCandidate::new("Alice Smith", "person", "engineer at acme"))
        .await
        .unwrap();
    assert!(!resolved.was_created());
    assert_eq!(resolved.id(), alice);

    let graph = engine.get_neighbors(alice, Some(1), None, None).await.unwrap();
    assert!(graph.contains_node(acme));
    assert_eq!(graph.edges.len(), 1);

    let page = engine
        .get_common_documents(&[alice, acme], 1, None)
        .await
        .unwrap();
    assert_eq!(page.items, vec!["doc-1".to_string()]);
}

#[tokio::test]
async fn test_merge_persists_and_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    let (root, alias, acme) = {
        let engine = engine_at(&path);
        let report = engine
            .ingest(
                ExtractionBatch::new()
                    .with_document("doc-1")
                    .entity(EntityCandidate::new("Robert", "person", "welder"))
                    .entity(EntityCandidate::new("Bob", "person", "quiz buff"))
                    .entity(EntityCandidate::new("Acme", "organization", "anvil maker"))
                    .relation(RelationCandidate::new("Robert", "works_at", "Acme"))
                    .relation(RelationCandidate::new("Bob", "works_at", "Acme")),
            )
            .await
            .unwrap();
        let root = report.entity_for("robert").unwrap();
        let alias = report.entity_for("bob").unwrap();
        let acme = report.entity_for("acme").unwrap();
        assert_ne!(root, alias);

        let outcome = engine.merge(alias, root).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.relations.dropped_duplicates, 1);
        (root, alias, acme)
    };

    let engine = engine_at(&path);
    assert_eq!(engine.canonical_entity(alias).await.unwrap().id, root);
    let graph = engine.get_neighbors(alias, Some(1), None, None).await.unwrap();
    assert_eq!(graph.center().map(|n| n.id), Some(root));
    assert_eq!(graph.edges.len(), 1);
    assert!(graph.contains_node(acme));

    let repair = engine.repair().await.unwrap();
    assert_eq!(repair.chains_flattened, 0);
}
