//! Kag Vector crate - description synthesis, embedding service, vector store, and pipeline.
//!
//! Turns graph elements into deterministic text descriptions, embeds them in
//! one batch per kind, and bulk-upserts the resulting records into a vector
//! store under kind-prefixed ids (`entity_<id>`, `relationship_<id>`).

pub mod describe;
pub mod embedding;
pub mod pipeline;
pub mod store;

pub use describe::{entity_description, relationship_description};
pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding};
pub use pipeline::{EmbeddingPipeline, EmbeddingReport};
pub use store::{InMemoryVectorStore, SearchHit, VectorRecord, VectorStore};
