//! Vector store collaborator and an in-memory implementation.
//!
//! `InMemoryVectorStore` keeps records in a map keyed by record id and
//! answers similarity queries by brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use kag_core::error::{KagError, Result};

/// One embedded graph element as stored in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Kind-prefixed id: `entity_<id>` or `relationship_<id>`.
    pub id: String,
    pub text_description: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity score.
    pub score: f64,
    pub metadata: Value,
}

/// Bulk-upsert vector store.
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id. Returns how many were stored.
    fn add_items(&self, items: &[VectorRecord]) -> Result<usize>;

    fn get_item(&self, id: &str) -> Result<Option<VectorRecord>>;

    fn collection_size(&self) -> usize;
}

/// In-memory vector store. Clones share the same collection.
#[derive(Debug, Clone)]
pub struct InMemoryVectorStore {
    collection_name: String,
    records: Arc<RwLock<HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// The k records most similar to `query`, by descending score.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let records = self
            .records
            .read()
            .map_err(|e| KagError::CollaboratorFailure(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<SearchHit> = records
            .values()
            .map(|record| SearchHit {
                id: record.id.clone(),
                score: cosine_similarity(query, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new("default_collection")
    }
}

impl VectorStore for InMemoryVectorStore {
    /// Records with an empty id, description or vector are skipped.
    fn add_items(&self, items: &[VectorRecord]) -> Result<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|e| KagError::CollaboratorFailure(format!("Lock poisoned: {}", e)))?;

        let mut stored = 0;
        for item in items {
            if item.id.is_empty() || item.text_description.is_empty() || item.vector.is_empty() {
                error!(
                    id = %item.id,
                    collection = %self.collection_name,
                    "Skipping item due to missing id, text_description, or vector"
                );
                continue;
            }
            records.insert(item.id.clone(), item.clone());
            stored += 1;
            debug!(id = %item.id, collection = %self.collection_name, "Upserted vector record");
        }
        Ok(stored)
    }

    fn get_item(&self, id: &str) -> Result<Option<VectorRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| KagError::CollaboratorFailure(format!("Lock poisoned: {}", e)))?;
        Ok(records.get(id).cloned())
    }

    fn collection_size(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
