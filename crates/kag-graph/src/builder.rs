//! Batch builder: applies one extraction batch to a graph store.
//!
//! A batch walks Idle -> SessionOpen -> NodesApplied -> EdgesApplied -> Idle.
//! The store lock is held for the whole walk, so batches against the same
//! store never interleave and the session's touched-node set stays private
//! to one batch.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use kag_core::error::{KagError, Result};
use kag_core::types::{Entity, Relationship};

use crate::store::GraphStore;

/// A graph store shared between the builder and its readers.
pub type SharedGraph = Arc<Mutex<GraphStore>>;

/// Lifecycle of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    SessionOpen,
    NodesApplied,
    EdgesApplied,
}

impl BuildPhase {
    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(self, next: BuildPhase) -> bool {
        matches!(
            (self, next),
            (BuildPhase::Idle, BuildPhase::SessionOpen)
                | (BuildPhase::SessionOpen, BuildPhase::NodesApplied)
                | (BuildPhase::NodesApplied, BuildPhase::EdgesApplied)
                | (BuildPhase::EdgesApplied, BuildPhase::Idle)
        )
    }
}

/// Ids applied by one batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub added_nodes: Vec<String>,
    pub added_edges: Vec<String>,
}

/// Coordinates add-entities/add-relationships cycles against one store.
pub struct BatchBuilder {
    graph: Option<SharedGraph>,
    phase: BuildPhase,
}

impl BatchBuilder {
    pub fn new(graph: SharedGraph) -> Self {
        Self {
            graph: Some(graph),
            phase: BuildPhase::Idle,
        }
    }

    /// A builder with no graph store configured. Every batch is a no-op.
    pub fn unavailable() -> Self {
        Self {
            graph: None,
            phase: BuildPhase::Idle,
        }
    }

    pub fn graph(&self) -> Option<&SharedGraph> {
        self.graph.as_ref()
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Apply one batch. Never fails: entities or relationships that cannot be
    /// applied are logged and left out of the returned id lists.
    pub fn build_or_update(
        &mut self,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> BatchOutcome {
        let graph = match self.require_graph() {
            Ok(graph) => graph,
            Err(e) => {
                error!(error = %e, "Skipping graph build/update");
                return BatchOutcome::default();
            }
        };
        let mut store = match graph.lock() {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "Knowledge graph store lock poisoned; skipping batch");
                return BatchOutcome::default();
            }
        };

        info!(
            entities = entities.len(),
            relationships = relationships.len(),
            "Starting graph build/update"
        );

        store.clear_session();
        self.enter(BuildPhase::SessionOpen);

        let added_nodes = apply_entities(&mut store, entities);
        self.enter(BuildPhase::NodesApplied);

        let added_edges = apply_relationships(&mut store, relationships);
        self.enter(BuildPhase::EdgesApplied);

        info!(
            nodes = added_nodes.len(),
            edges = added_edges.len(),
            summary = %store.summary(),
            "Graph build/update complete"
        );
        self.enter(BuildPhase::Idle);

        BatchOutcome {
            added_nodes,
            added_edges,
        }
    }

    fn require_graph(&self) -> Result<SharedGraph> {
        self.graph.clone().ok_or_else(|| {
            KagError::CollaboratorUnavailable("knowledge graph store".to_string())
        })
    }

    fn enter(&mut self, next: BuildPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid batch transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "Batch phase transition");
        self.phase = next;
    }
}

fn apply_entities(store: &mut GraphStore, entities: Vec<Entity>) -> Vec<String> {
    let mut added = Vec::with_capacity(entities.len());
    for entity in entities {
        let text = entity.text.clone();
        let id = entity.id.clone().unwrap_or_else(|| "N/A".to_string());
        match store.add_entity(entity) {
            Ok(node_id) => added.push(node_id),
            Err(e) => error!(entity = %text, id = %id, error = %e, "Error adding entity to graph"),
        }
    }
    added
}

fn apply_relationships(store: &mut GraphStore, relationships: Vec<Relationship>) -> Vec<String> {
    let mut added = Vec::with_capacity(relationships.len());
    for relationship in relationships {
        let id = relationship.id.clone().unwrap_or_else(|| "N/A".to_string());
        match store.add_relationship(relationship) {
            Ok(edge_id) => added.push(edge_id),
            Err(e @ KagError::ReferentialIntegrity { .. }) => {
                warn!(relationship = %id, error = %e, "Skipping relationship due to missing node")
            }
            Err(e) => error!(relationship = %id, error = %e, "Error adding relationship to graph"),
        }
    }
    added
}
