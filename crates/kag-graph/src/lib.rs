//! Kag Graph crate - deduplicated knowledge graph, mutual index, batch builder, snapshots.
//!
//! The graph store owns node/edge identity and referential integrity, the
//! mutual index answers provenance queries in both directions (element to
//! chunks and chunk to elements), and the batch builder applies one
//! extraction batch under a single integrity session.

pub mod builder;
pub mod index;
pub mod snapshot;
pub mod store;

pub use builder::{BatchBuilder, BatchOutcome, BuildPhase, SharedGraph};
pub use index::{ChunkElements, ElementRef, MutualIndex};
pub use snapshot::{load_snapshot, save_snapshot, GraphSnapshot};
pub use store::{Edge, GraphStore, GraphSummary, Node};
