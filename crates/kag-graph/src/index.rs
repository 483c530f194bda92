//! Mutual index: traceability between source chunks and graph elements.
//!
//! Provenance lives on the nodes and edges themselves; this module only
//! defines the query contract. Lookups of unknown ids yield empty sets, never
//! errors. Use [`GraphStore::contains_node`] / [`GraphStore::contains_edge`]
//! to tell "absent" apart from "no provenance".

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use kag_core::types::Provenance;

use crate::store::GraphStore;

/// A node or an edge id. Node and edge ids are independent namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef<'a> {
    Node(&'a str),
    Edge(&'a str),
}

/// Graph elements produced from one source chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkElements {
    pub nodes: BTreeSet<String>,
    pub edges: BTreeSet<String>,
}

impl ChunkElements {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Read-only provenance view over a [`GraphStore`].
#[derive(Debug, Clone, Copy)]
pub struct MutualIndex<'a> {
    store: &'a GraphStore,
}

impl<'a> MutualIndex<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Accumulated chunk ids of a node or edge.
    pub fn provenance(&self, element: ElementRef<'_>) -> Provenance {
        let found = match element {
            ElementRef::Node(id) => self.store.node(id).map(|n| &n.provenance),
            ElementRef::Edge(id) => self.store.edge(id).map(|e| &e.provenance),
        };
        found.cloned().unwrap_or_default()
    }

    /// Chunk ids of the edges from `source` to `target`.
    ///
    /// With `key`, only that edge is considered (and only if it actually runs
    /// from `source` to `target`); without it, the union over every edge
    /// between the pair is returned.
    pub fn provenance_between(&self, source: &str, target: &str, key: Option<&str>) -> Provenance {
        let Some(edge_ids) = self.store.edge_ids_between(source, target) else {
            return Provenance::new();
        };

        match key {
            Some(key) if edge_ids.contains(key) => self.provenance(ElementRef::Edge(key)),
            Some(_) => Provenance::new(),
            None => edge_ids
                .iter()
                .filter_map(|id| self.store.edge(id))
                .flat_map(|edge| edge.provenance.iter().cloned())
                .collect(),
        }
    }

    /// Nodes and edges that recorded `chunk_id` in their provenance.
    pub fn elements_for_chunk(&self, chunk_id: &str) -> ChunkElements {
        self.store
            .chunk_elements(chunk_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every chunk id known to the store, sorted.
    pub fn chunk_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.store.chunk_ids().cloned().collect();
        ids.sort();
        ids
    }
}
