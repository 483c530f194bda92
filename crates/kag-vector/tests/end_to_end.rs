//! Graph building followed by embedding, across the graph and vector crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kag_core::error::{KagError, Result};
use kag_core::types::{Entity, Relationship};
use kag_graph::{BatchBuilder, ElementRef, GraphStore};
use kag_vector::{
    EmbeddingPipeline, EmbeddingReport, HashEmbedding, InMemoryVectorStore, VectorRecord,
    VectorStore,
};

// =============================================================================
// Helpers
// =============================================================================

fn entities() -> Vec<Entity> {
    vec![
        Entity::new("PERSON", "Alice").with_id("e1").with_chunk("c1"),
        Entity::new("ORGANIZATION", "Google").with_id("e2").with_chunk("c1"),
    ]
}

fn relationships() -> Vec<Relationship> {
    vec![Relationship::new("e1", "WORKS_AT", "e2")
        .with_id("r1")
        .with_chunk("c1")]
}

/// A vector store whose bulk upsert always fails.
struct UnreachableStore;

impl VectorStore for UnreachableStore {
    fn add_items(&self, _items: &[VectorRecord]) -> Result<usize> {
        Err(KagError::CollaboratorFailure("connection refused".to_string()))
    }

    fn get_item(&self, _id: &str) -> Result<Option<VectorRecord>> {
        Ok(None)
    }

    fn collection_size(&self) -> usize {
        0
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_build_then_embed() {
    let graph = Arc::new(Mutex::new(GraphStore::new()));
    let mut builder = BatchBuilder::new(Arc::clone(&graph));

    let outcome = builder.build_or_update(entities(), relationships());
    assert_eq!(outcome.added_nodes, vec!["e1", "e2"]);
    assert_eq!(outcome.added_edges, vec!["r1"]);

    let vectors = Arc::new(InMemoryVectorStore::new("knowledge_graph_embeddings"));
    let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(16)), vectors.clone());
    let before = vectors.collection_size();

    let (graph_entities, graph_relationships, lookup) = {
        let store = graph.lock().unwrap();
        (store.entities(), store.relationships(), store.entity_lookup())
    };
    let report = pipeline
        .store_embeddings(&graph_entities, &graph_relationships, Some(&lookup))
        .await;

    assert_eq!(
        report,
        EmbeddingReport {
            entities_processed: 2,
            relationships_processed: 1
        }
    );
    assert_eq!(vectors.collection_size(), before + 3);

    let record = vectors.get_item("relationship_r1").unwrap().unwrap();
    assert_eq!(
        record.text_description,
        "Relationship: 'Alice' WORKS_AT 'Google'. (ID: r1)"
    );
    assert_eq!(record.metadata["provenance"], serde_json::json!(["c1"]));
}

#[tokio::test]
async fn test_entity_and_relationship_ids_do_not_collide() {
    let vectors = Arc::new(InMemoryVectorStore::default());
    let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), vectors.clone());

    let entity = Entity::new("THING", "Widget").with_id("x1");
    let relationship = Relationship::new("x1", "PART_OF", "x1").with_id("x1");
    let report = pipeline
        .store_embeddings(&[entity], &[relationship], None)
        .await;

    assert_eq!(report.entities_processed, 1);
    assert_eq!(report.relationships_processed, 1);
    assert_eq!(vectors.collection_size(), 2);

    let entity_record = vectors.get_item("entity_x1").unwrap().unwrap();
    let relationship_record = vectors.get_item("relationship_x1").unwrap().unwrap();
    assert_eq!(entity_record.metadata["type"], "entity");
    assert_eq!(relationship_record.metadata["type"], "relationship");
}

#[tokio::test]
async fn test_failed_upsert_still_counts_embedded_items() {
    let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), Arc::new(UnreachableStore));
    let lookup: HashMap<String, Entity> = entities()
        .into_iter()
        .map(|e| (e.id.clone().unwrap_or_default(), e))
        .collect();

    let report = pipeline
        .store_embeddings(&entities(), &relationships(), Some(&lookup))
        .await;

    // "processed" means embedded; nothing was durably stored.
    assert_eq!(
        report,
        EmbeddingReport {
            entities_processed: 2,
            relationships_processed: 1
        }
    );
}

#[tokio::test]
async fn test_repeated_batches_accumulate_provenance_and_reembed() {
    let graph = Arc::new(Mutex::new(GraphStore::new()));
    let mut builder = BatchBuilder::new(Arc::clone(&graph));

    builder.build_or_update(entities(), relationships());
    builder.build_or_update(
        vec![Entity::new("PERSON", "Alice").with_id("e1").with_chunk("c2")],
        vec![Relationship::new("e1", "WORKS_AT", "e2")
            .with_id("r1")
            .with_chunk("c2")],
    );

    let store = graph.lock().unwrap();
    let index = store.mutual_index();
    assert_eq!(index.provenance(ElementRef::Node("e1")).len(), 2);
    assert_eq!(index.provenance_between("e1", "e2", None).len(), 2);
    assert_eq!(index.elements_for_chunk("c2").nodes.len(), 1);

    let graph_entities = store.entities();
    let graph_relationships = store.relationships();
    let lookup = store.entity_lookup();
    drop(store);

    let vectors = Arc::new(InMemoryVectorStore::default());
    let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), vectors.clone());
    pipeline
        .store_embeddings(&graph_entities, &graph_relationships, Some(&lookup))
        .await;
    pipeline
        .store_embeddings(&graph_entities, &graph_relationships, Some(&lookup))
        .await;

    // Upsert by id: re-embedding the same elements does not grow the collection.
    assert_eq!(vectors.collection_size(), 3);
}
