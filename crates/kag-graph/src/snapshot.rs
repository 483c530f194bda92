//! JSON snapshots of a graph store.
//!
//! Nodes and edges are written sorted by id with provenance as sorted lists,
//! so two snapshots of the same logical graph are byte-identical apart from
//! `saved_at`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use kag_core::config::GraphConfig;
use kag_core::error::Result;

use crate::store::{Edge, GraphStore, Node};

/// Serializable form of a [`GraphStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub saved_at: DateTime<Utc>,
    /// Generated-id counters, so ids stay monotonic across reloads.
    #[serde(default)]
    pub node_seq: u64,
    #[serde(default)]
    pub edge_seq: u64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn capture(store: &GraphStore) -> Self {
        let mut nodes: Vec<Node> = store.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<Edge> = store.edges().cloned().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        let (node_seq, edge_seq) = store.sequences();

        Self {
            saved_at: Utc::now(),
            node_seq,
            edge_seq,
            nodes,
            edges,
        }
    }

    /// Rebuild a store, including its adjacency and chunk indexes.
    pub fn into_store(self, config: &GraphConfig) -> Result<GraphStore> {
        GraphStore::restore(config, self.nodes, self.edges, self.node_seq, self.edge_seq)
    }
}

/// Write a snapshot of `store` to `path` as pretty JSON.
pub fn save_snapshot(store: &GraphStore, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let snapshot = GraphSnapshot::capture(store);
    let content = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, content)?;
    info!(
        path = %path.display(),
        nodes = snapshot.nodes.len(),
        edges = snapshot.edges.len(),
        "Knowledge graph saved"
    );
    Ok(())
}

/// Load a store from a snapshot file written by [`save_snapshot`].
pub fn load_snapshot(path: &Path, config: &GraphConfig) -> Result<GraphStore> {
    let content = std::fs::read_to_string(path)?;
    let snapshot: GraphSnapshot = serde_json::from_str(&content)?;
    let store = snapshot.into_store(config)?;
    info!(path = %path.display(), summary = %store.summary(), "Knowledge graph loaded");
    Ok(store)
}
