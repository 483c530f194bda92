//! Embedding pipeline: describe, embed, assemble, upsert.
//!
//! Entities and relationships are embedded independently (one batch call per
//! kind, run concurrently) and then written to the vector store in a single
//! bulk upsert. A failed kind contributes nothing; the other kind still goes
//! through. The returned counts mean "successfully embedded", not "durably
//! stored": a failed upsert is logged but does not lower them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use kag_core::config::KagConfig;
use kag_core::error::{KagError, Result};
use kag_core::types::{Entity, Relationship};

use crate::describe::{entity_description, relationship_description};
use crate::embedding::{DynEmbeddingService, HashEmbedding};
use crate::store::{InMemoryVectorStore, VectorRecord, VectorStore};

/// Per-kind counts of successfully embedded items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingReport {
    pub entities_processed: usize,
    pub relationships_processed: usize,
}

/// Stateless orchestration over an embedding service and a vector store.
///
/// Either collaborator may be absent, in which case every call returns a
/// zero report without doing any work.
pub struct EmbeddingPipeline {
    embedder: Option<Arc<dyn DynEmbeddingService>>,
    store: Option<Arc<dyn VectorStore>>,
    upsert_attempts: u32,
    model: Option<String>,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self::from_parts(Some(embedder), Some(store))
    }

    pub fn from_parts(
        embedder: Option<Arc<dyn DynEmbeddingService>>,
        store: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            embedder,
            store,
            upsert_attempts: 1,
            model: None,
        }
    }

    /// Build the pipeline described by `config`, with a [`HashEmbedding`]
    /// and the given vector store. Disabled sections leave the matching
    /// collaborator unset.
    pub fn from_config(config: &KagConfig, store: Arc<InMemoryVectorStore>) -> Self {
        let embedder: Option<Arc<dyn DynEmbeddingService>> = config
            .embedding
            .enabled
            .then(|| Arc::new(HashEmbedding::new(config.embedding.dimensions)) as Arc<dyn DynEmbeddingService>);
        let store: Option<Arc<dyn VectorStore>> = config
            .vector_store
            .enabled
            .then(|| store as Arc<dyn VectorStore>);

        if config.embedding.enabled {
            info!(
                model = %config.embedding.model,
                dimensions = config.embedding.dimensions,
                "Embedding model configured"
            );
        }

        let mut pipeline = Self::from_parts(embedder, store)
            .with_upsert_attempts(config.vector_store.upsert_attempts);
        if config.embedding.enabled {
            pipeline.model = Some(config.embedding.model.clone());
        }
        pipeline
    }

    /// Name of the configured embedding model, when built from config.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Total bulk-upsert attempts. Values below 1 are treated as 1.
    pub fn with_upsert_attempts(mut self, attempts: u32) -> Self {
        self.upsert_attempts = attempts.max(1);
        self
    }

    pub fn is_available(&self) -> bool {
        self.embedder.is_some() && self.store.is_some()
    }

    /// Embed and store the given entities and relationships.
    ///
    /// `entity_lookup` supplies endpoint texts for relationship descriptions;
    /// without it, endpoints render as placeholders. Records without an id
    /// are skipped.
    pub async fn store_embeddings(
        &self,
        entities: &[Entity],
        relationships: &[Relationship],
        entity_lookup: Option<&HashMap<String, Entity>>,
    ) -> EmbeddingReport {
        let (embedder, store) = match self.collaborators() {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Cannot store embeddings");
                return EmbeddingReport::default();
            }
        };

        let entities: Vec<(&str, &Entity)> = entities
            .iter()
            .filter_map(|e| match e.resolved_id() {
                Some(id) => Some((id, e)),
                None => {
                    warn!(text = %e.text, "Skipping entity without id");
                    None
                }
            })
            .collect();
        let relationships: Vec<(&str, &Relationship)> = relationships
            .iter()
            .filter_map(|r| match r.resolved_id() {
                Some(id) => Some((id, r)),
                None => {
                    warn!(label = %r.label, "Skipping relationship without id");
                    None
                }
            })
            .collect();

        if !relationships.is_empty() && entity_lookup.is_none() {
            warn!("No entity lookup provided for relationships; descriptions may lack context");
        }

        // Stage 1: describe.
        let entity_texts: Vec<String> = entities.iter().map(|(_, e)| entity_description(e)).collect();
        let relationship_texts: Vec<String> = relationships
            .iter()
            .map(|(_, r)| relationship_description(r, entity_lookup))
            .collect();

        // Stage 2: embed, one batch per kind.
        let model = self.model().unwrap_or("unnamed");
        let (entity_vectors, relationship_vectors) = tokio::join!(
            embed_kind(embedder, model, "entities", &entity_texts),
            embed_kind(embedder, model, "relationships", &relationship_texts),
        );

        // Stage 3: assemble.
        let mut records = Vec::with_capacity(entity_texts.len() + relationship_texts.len());
        let mut report = EmbeddingReport::default();

        if let Some(vectors) = entity_vectors {
            for (((id, entity), text), vector) in entities.iter().zip(entity_texts).zip(vectors) {
                records.push(VectorRecord {
                    id: format!("entity_{}", id),
                    text_description: text,
                    vector,
                    metadata: json!({
                        "type": "entity",
                        "original_id": id,
                        "label": entity.label,
                        "provenance": entity.provenance,
                    }),
                });
                report.entities_processed += 1;
            }
        }

        if let Some(vectors) = relationship_vectors {
            for (((id, rel), text), vector) in relationships.iter().zip(relationship_texts).zip(vectors) {
                records.push(VectorRecord {
                    id: format!("relationship_{}", id),
                    text_description: text,
                    vector,
                    metadata: json!({
                        "type": "relationship",
                        "original_id": id,
                        "label": rel.label,
                        "source_id": rel.source_entity_id,
                        "target_id": rel.target_entity_id,
                        "provenance": rel.provenance,
                    }),
                });
                report.relationships_processed += 1;
            }
        }

        // Stage 4: single bulk upsert.
        if !records.is_empty() {
            self.upsert(store, &records);
        }

        report
    }

    /// Both collaborators, or the first one that is not configured.
    fn collaborators(&self) -> Result<(&dyn DynEmbeddingService, &dyn VectorStore)> {
        let embedder = self
            .embedder
            .as_deref()
            .ok_or_else(|| KagError::CollaboratorUnavailable("embedding model".to_string()))?;
        let store = self
            .store
            .as_deref()
            .ok_or_else(|| KagError::CollaboratorUnavailable("vector store".to_string()))?;
        Ok((embedder, store))
    }

    fn upsert(&self, store: &dyn VectorStore, records: &[VectorRecord]) {
        for attempt in 1..=self.upsert_attempts {
            match store.add_items(records) {
                Ok(stored) => {
                    info!(submitted = records.len(), stored, "Submitted items to vector store");
                    return;
                }
                Err(e) if attempt < self.upsert_attempts => {
                    warn!(attempt, error = %e, "Vector store upsert failed; retrying");
                }
                Err(e) => {
                    error!(attempt, error = %e, "Error adding items to vector store");
                }
            }
        }
    }
}

/// Embed one kind's descriptions. `None` means the kind is dropped from
/// this run; an empty input never reaches the embedder.
async fn embed_kind(
    embedder: &dyn DynEmbeddingService,
    model: &str,
    kind: &str,
    texts: &[String],
) -> Option<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Some(Vec::new());
    }

    info!(model, kind, count = texts.len(), "Embedding batch");
    match embedder.embed_batch_boxed(texts).await {
        Ok(vectors) if vectors.len() == texts.len() => Some(vectors),
        Ok(vectors) => {
            error!(
                kind,
                expected = texts.len(),
                received = vectors.len(),
                "Embedding batch returned a mismatched number of vectors"
            );
            None
        }
        Err(e) => {
            error!(kind, error = %e, "Error embedding batch");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::embedding::EmbeddingService;

    /// Fails every batch whose first text starts with `prefix`.
    struct FailingEmbedding {
        prefix: &'static str,
        calls: AtomicUsize,
    }

    impl FailingEmbedding {
        fn new(prefix: &'static str) -> Self {
            Self {
                prefix,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingService for FailingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            HashEmbedding::new(4).embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.first().is_some_and(|t| t.starts_with(self.prefix)) {
                return Err(KagError::CollaboratorFailure("model offline".to_string()));
            }
            HashEmbedding::new(4).embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    /// Returns one vector fewer than requested.
    struct ShortEmbedding;

    impl EmbeddingService for ShortEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; 4])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; 4]; texts.len().saturating_sub(1)])
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    /// Fails the first `failures` upserts, then delegates.
    struct FlakyStore {
        inner: InMemoryVectorStore,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryVectorStore::default(),
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl VectorStore for FlakyStore {
        fn add_items(&self, items: &[VectorRecord]) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(KagError::CollaboratorFailure("store unreachable".to_string()));
            }
            self.inner.add_items(items)
        }

        fn get_item(&self, id: &str) -> Result<Option<VectorRecord>> {
            self.inner.get_item(id)
        }

        fn collection_size(&self) -> usize {
            self.inner.collection_size()
        }
    }

    fn alice() -> Entity {
        Entity::new("PERSON", "Alice")
            .with_id("e1")
            .with_attribute("role", "Engineer")
            .with_chunk("c1")
    }

    fn acme() -> Entity {
        Entity::new("ORGANIZATION", "AcmeCorp").with_id("e2")
    }

    fn works_for() -> Relationship {
        Relationship::new("e1", "WORKS_FOR", "e2").with_id("r1")
    }

    fn lookup() -> HashMap<String, Entity> {
        HashMap::from([("e1".to_string(), alice()), ("e2".to_string(), acme())])
    }

    fn hash_pipeline(store: Arc<InMemoryVectorStore>) -> EmbeddingPipeline {
        EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), store)
    }

    #[tokio::test]
    async fn test_entities_only() {
        let store = Arc::new(InMemoryVectorStore::default());
        let pipeline = hash_pipeline(Arc::clone(&store));

        let report = pipeline.store_embeddings(&[alice()], &[], None).await;
        assert_eq!(
            report,
            EmbeddingReport {
                entities_processed: 1,
                relationships_processed: 0
            }
        );

        let record = store.get_item("entity_e1").unwrap().unwrap();
        assert!(record.text_description.starts_with("Entity: Alice (Type: PERSON)"));
        assert_eq!(record.vector.len(), 8);
        assert_eq!(record.metadata["type"], json!("entity"));
        assert_eq!(record.metadata["original_id"], json!("e1"));
        assert_eq!(record.metadata["provenance"], json!(["c1"]));
    }

    #[tokio::test]
    async fn test_relationships_only_use_lookup() {
        let store = Arc::new(InMemoryVectorStore::default());
        let pipeline = hash_pipeline(Arc::clone(&store));

        let report = pipeline
            .store_embeddings(&[], &[works_for()], Some(&lookup()))
            .await;
        assert_eq!(report.relationships_processed, 1);

        let record = store.get_item("relationship_r1").unwrap().unwrap();
        assert!(record
            .text_description
            .starts_with("Relationship: 'Alice' WORKS_FOR 'AcmeCorp'"));
        assert_eq!(record.metadata["source_id"], json!("e1"));
        assert_eq!(record.metadata["target_id"], json!("e2"));
    }

    #[tokio::test]
    async fn test_relationship_without_lookup_uses_placeholders() {
        let store = Arc::new(InMemoryVectorStore::default());
        let pipeline = hash_pipeline(Arc::clone(&store));

        pipeline.store_embeddings(&[], &[works_for()], None).await;
        let record = store.get_item("relationship_r1").unwrap().unwrap();
        assert!(record.text_description.contains("'Unknown Source Entity'"));
    }

    #[tokio::test]
    async fn test_entity_embedding_failure_keeps_relationships() {
        let store = Arc::new(InMemoryVectorStore::default());
        let embedder = Arc::new(FailingEmbedding::new("Entity:"));
        let pipeline = EmbeddingPipeline::new(embedder.clone(), store.clone());

        let report = pipeline
            .store_embeddings(&[alice(), acme()], &[works_for()], Some(&lookup()))
            .await;
        assert_eq!(report.entities_processed, 0);
        assert_eq!(report.relationships_processed, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.collection_size(), 1);
        assert!(store.get_item("relationship_r1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_only_kind_fails_nothing_upserted() {
        let store = Arc::new(FlakyStore::new(0));
        let pipeline = EmbeddingPipeline::new(Arc::new(FailingEmbedding::new("Entity:")), store.clone());

        let report = pipeline.store_embeddings(&[alice()], &[], None).await;
        assert_eq!(report, EmbeddingReport::default());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mismatched_vector_count_drops_kind() {
        let store = Arc::new(InMemoryVectorStore::default());
        let pipeline = EmbeddingPipeline::new(Arc::new(ShortEmbedding), store.clone());

        let report = pipeline.store_embeddings(&[alice(), acme()], &[], None).await;
        assert_eq!(report.entities_processed, 0);
        assert_eq!(store.collection_size(), 0);
    }

    #[tokio::test]
    async fn test_upsert_failure_still_reports_embedded_counts() {
        let store = Arc::new(FlakyStore::new(1));
        let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), store.clone());

        let report = pipeline
            .store_embeddings(&[alice(), acme()], &[works_for()], Some(&lookup()))
            .await;

        // Counts describe embedding success, not durable storage.
        assert_eq!(
            report,
            EmbeddingReport {
                entities_processed: 2,
                relationships_processed: 1
            }
        );
        assert_eq!(store.collection_size(), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upsert_retry_recovers() {
        let store = Arc::new(FlakyStore::new(2));
        let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedding::new(8)), store.clone())
            .with_upsert_attempts(3);

        pipeline.store_embeddings(&[alice()], &[], None).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.collection_size(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_collaborators_short_circuit() {
        let store = Arc::new(FlakyStore::new(0));
        let embedder = Arc::new(FailingEmbedding::new("never"));

        let no_store = EmbeddingPipeline::from_parts(Some(embedder.clone()), None);
        let no_model = EmbeddingPipeline::from_parts(None, Some(store.clone()));
        assert!(!no_store.is_available());
        assert!(!no_model.is_available());

        for pipeline in [no_store, no_model] {
            let report = pipeline
                .store_embeddings(&[alice()], &[works_for()], Some(&lookup()))
                .await;
            assert_eq!(report, EmbeddingReport::default());
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_inputs_touch_nothing() {
        let store = Arc::new(FlakyStore::new(0));
        let embedder = Arc::new(FailingEmbedding::new("never"));
        let pipeline = EmbeddingPipeline::new(embedder.clone(), store.clone());

        let report = pipeline.store_embeddings(&[], &[], None).await;
        assert_eq!(report, EmbeddingReport::default());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_records_without_id_skipped() {
        let store = Arc::new(InMemoryVectorStore::default());
        let pipeline = hash_pipeline(Arc::clone(&store));

        let report = pipeline
            .store_embeddings(&[Entity::new("PERSON", "Anonymous"), alice()], &[], None)
            .await;
        assert_eq!(report.entities_processed, 1);
        assert_eq!(store.collection_size(), 1);
    }

    #[tokio::test]
    async fn test_from_config_respects_disabled_sections() {
        let mut config = KagConfig::default();
        config.embedding.enabled = false;
        let pipeline = EmbeddingPipeline::from_config(&config, Arc::new(InMemoryVectorStore::default()));
        assert!(!pipeline.is_available());

        let pipeline = EmbeddingPipeline::from_config(&KagConfig::default(), Arc::new(InMemoryVectorStore::default()));
        assert!(pipeline.is_available());
    }

    #[test]
    fn test_from_config_carries_model_name() {
        let mut config = KagConfig::default();
        config.embedding.model = "minilm-l6".to_string();
        let pipeline = EmbeddingPipeline::from_config(&config, Arc::new(InMemoryVectorStore::default()));
        assert_eq!(pipeline.model(), Some("minilm-l6"));

        config.embedding.enabled = false;
        let pipeline = EmbeddingPipeline::from_config(&config, Arc::new(InMemoryVectorStore::default()));
        assert_eq!(pipeline.model(), None);

        assert_eq!(hash_pipeline(Arc::new(InMemoryVectorStore::default())).model(), None);
    }

    #[test]
    fn test_missing_collaborator_names_which_one() {
        let embedder: Arc<dyn DynEmbeddingService> = Arc::new(HashEmbedding::new(4));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::default());

        let no_store = EmbeddingPipeline::from_parts(Some(embedder), None);
        match no_store.collaborators() {
            Err(KagError::CollaboratorUnavailable(what)) => assert_eq!(what, "vector store"),
            other => panic!("Expected CollaboratorUnavailable, got {:?}", other.err()),
        }

        let no_model = EmbeddingPipeline::from_parts(None, Some(store));
        match no_model.collaborators() {
            Err(KagError::CollaboratorUnavailable(what)) => assert_eq!(what, "embedding model"),
            other => panic!("Expected CollaboratorUnavailable, got {:?}", other.err()),
        }
    }
}
