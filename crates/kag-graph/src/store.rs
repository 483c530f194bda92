//! Graph store: node/edge identity, upsert, and referential integrity.
//!
//! Nodes and edges live in flat tables keyed by id. Multi-edges are tracked
//! through a secondary `(source, target) -> {edge id}` adjacency index, and
//! every provenance union is mirrored into a reverse `chunk -> elements` index.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kag_core::config::GraphConfig;
use kag_core::error::{Endpoint, KagError, Result};
use kag_core::types::{Attributes, Entity, Provenance, Relationship};

use crate::index::{ChunkElements, MutualIndex};

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub text: String,
    /// `None` until some submission carries an attribute map.
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Node {
    /// Convert back into an entity record with a resolved id.
    pub fn to_entity(&self) -> Entity {
        Entity {
            id: Some(self.id.clone()),
            label: self.label.clone(),
            text: self.text.clone(),
            attributes: self.attributes.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

/// A stored directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Edge {
    pub fn to_relationship(&self) -> Relationship {
        Relationship {
            id: Some(self.id.clone()),
            source_entity_id: self.source.clone(),
            target_entity_id: self.target.clone(),
            label: self.label.clone(),
            attributes: self.attributes.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

/// Node and edge counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph contains {} nodes and {} edges.",
            self.node_count, self.edge_count
        )
    }
}

/// Append/upsert-only directed multigraph.
///
/// Not internally synchronized: a batch needs exclusive access for the
/// duration of its integrity session (see [`crate::builder::BatchBuilder`]).
#[derive(Debug, Clone)]
pub struct GraphStore {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    adjacency: HashMap<(String, String), BTreeSet<String>>,
    chunk_index: HashMap<String, ChunkElements>,
    /// Node ids touched since the last `clear_session`.
    session: HashSet<String>,
    node_seq: u64,
    edge_seq: u64,
    node_prefix: String,
    edge_prefix: String,
}

impl GraphStore {
    /// Create an empty store with the default `node_`/`edge_` id prefixes.
    pub fn new() -> Self {
        Self::from_config(&GraphConfig::default())
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            adjacency: HashMap::new(),
            chunk_index: HashMap::new(),
            session: HashSet::new(),
            node_seq: 0,
            edge_seq: 0,
            node_prefix: config.node_id_prefix.clone(),
            edge_prefix: config.edge_id_prefix.clone(),
        }
    }

    /// Insert or update a node and return its resolved id.
    ///
    /// Attributes merge last-write-wins per key, provenance is unioned, and
    /// label/text take the latest submission. The node joins the current
    /// session so that relationships later in the batch can reference it.
    pub fn add_entity(&mut self, entity: Entity) -> Result<String> {
        if entity.label.trim().is_empty() {
            return Err(KagError::Validation(format!(
                "entity '{}' has an empty label",
                entity.text
            )));
        }

        let id = match entity.resolved_id() {
            Some(id) => id.to_string(),
            None => self.next_node_id(),
        };

        for chunk in &entity.provenance {
            self.chunk_index
                .entry(chunk.clone())
                .or_default()
                .nodes
                .insert(id.clone());
        }

        match self.nodes.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                let node = slot.get_mut();
                debug!(node_id = %id, text = %entity.text, "Updating node");
                node.label = entity.label;
                node.text = entity.text;
                merge_attributes(&mut node.attributes, entity.attributes);
                node.provenance.extend(entity.provenance);
            }
            Entry::Vacant(slot) => {
                debug!(node_id = %id, text = %entity.text, "Adding new node");
                slot.insert(Node {
                    id: id.clone(),
                    label: entity.label,
                    text: entity.text,
                    attributes: entity.attributes,
                    provenance: entity.provenance,
                });
            }
        }

        self.session.insert(id.clone());
        Ok(id)
    }

    /// Insert or update an edge and return its resolved id.
    ///
    /// Both endpoints must already be stored or have been touched in the
    /// current session; otherwise nothing is inserted and a
    /// [`KagError::ReferentialIntegrity`] names the missing side.
    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<String> {
        let display_id = relationship.resolved_id().unwrap_or("(unassigned)").to_string();

        if relationship.source_entity_id.trim().is_empty() {
            return Err(KagError::Validation(format!(
                "relationship {} has no source_entity_id",
                display_id
            )));
        }
        if relationship.target_entity_id.trim().is_empty() {
            return Err(KagError::Validation(format!(
                "relationship {} has no target_entity_id",
                display_id
            )));
        }
        if relationship.label.trim().is_empty() {
            return Err(KagError::Validation(format!(
                "relationship {} has an empty label",
                display_id
            )));
        }

        for (endpoint, node_id) in [
            (Endpoint::Source, &relationship.source_entity_id),
            (Endpoint::Target, &relationship.target_entity_id),
        ] {
            if !self.is_resolvable(node_id) {
                return Err(KagError::ReferentialIntegrity {
                    relationship_id: display_id,
                    endpoint,
                    missing_id: node_id.clone(),
                });
            }
        }

        let id = match relationship.resolved_id() {
            Some(id) => id.to_string(),
            None => self.next_edge_id(),
        };

        for chunk in &relationship.provenance {
            self.chunk_index
                .entry(chunk.clone())
                .or_default()
                .edges
                .insert(id.clone());
        }

        let pair = (
            relationship.source_entity_id.clone(),
            relationship.target_entity_id.clone(),
        );

        let previous_pair = match self.edges.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                let edge = slot.get_mut();
                debug!(
                    edge_id = %id,
                    source = %pair.0,
                    label = %relationship.label,
                    target = %pair.1,
                    "Updating edge"
                );
                let previous = (edge.source.clone(), edge.target.clone());
                edge.source = relationship.source_entity_id;
                edge.target = relationship.target_entity_id;
                edge.label = relationship.label;
                merge_attributes(&mut edge.attributes, relationship.attributes);
                edge.provenance.extend(relationship.provenance);
                Some(previous)
            }
            Entry::Vacant(slot) => {
                debug!(
                    edge_id = %id,
                    source = %pair.0,
                    label = %relationship.label,
                    target = %pair.1,
                    "Adding new edge"
                );
                slot.insert(Edge {
                    id: id.clone(),
                    source: relationship.source_entity_id,
                    target: relationship.target_entity_id,
                    label: relationship.label,
                    attributes: relationship.attributes,
                    provenance: relationship.provenance,
                });
                None
            }
        };

        if let Some(previous) = previous_pair {
            if previous != pair {
                self.unlink(&previous, &id);
            }
        }
        self.adjacency.entry(pair).or_default().insert(id.clone());

        Ok(id)
    }

    /// Forget which nodes were touched by the previous batch.
    pub fn clear_session(&mut self) {
        self.session.clear();
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
        }
    }

    /// Provenance queries over this store.
    pub fn mutual_index(&self) -> MutualIndex<'_> {
        MutualIndex::new(self)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn contains_edge(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// All edges from `source` to `target`, ordered by edge id.
    pub fn edges_between(&self, source: &str, target: &str) -> Vec<&Edge> {
        self.edge_ids_between(source, target)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn edge_ids_between(&self, source: &str, target: &str) -> Option<&BTreeSet<String>> {
        self.adjacency
            .get(&(source.to_string(), target.to_string()))
    }

    pub(crate) fn chunk_elements(&self, chunk_id: &str) -> Option<&ChunkElements> {
        self.chunk_index.get(chunk_id)
    }

    pub(crate) fn chunk_ids(&self) -> impl Iterator<Item = &String> {
        self.chunk_index.keys()
    }

    /// Current nodes as entity records, ordered by id.
    pub fn entities(&self) -> Vec<Entity> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.into_iter().map(Node::to_entity).collect()
    }

    /// Current edges as relationship records, ordered by id.
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut edges: Vec<&Edge> = self.edges.values().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges.into_iter().map(Edge::to_relationship).collect()
    }

    /// Id to entity map, used to give relationship descriptions their
    /// endpoint texts.
    pub fn entity_lookup(&self) -> HashMap<String, Entity> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.to_entity()))
            .collect()
    }

    /// Rebuild a store from persisted parts. Edges whose endpoints are not
    /// among `nodes` are rejected.
    pub(crate) fn restore(
        config: &GraphConfig,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        node_seq: u64,
        edge_seq: u64,
    ) -> Result<Self> {
        let mut store = Self::from_config(config);
        store.node_seq = node_seq;
        store.edge_seq = edge_seq;

        for node in nodes {
            for chunk in &node.provenance {
                store
                    .chunk_index
                    .entry(chunk.clone())
                    .or_default()
                    .nodes
                    .insert(node.id.clone());
            }
            store.nodes.insert(node.id.clone(), node);
        }

        for edge in edges {
            for (endpoint, node_id) in [(Endpoint::Source, &edge.source), (Endpoint::Target, &edge.target)] {
                if !store.nodes.contains_key(node_id) {
                    return Err(KagError::ReferentialIntegrity {
                        relationship_id: edge.id.clone(),
                        endpoint,
                        missing_id: node_id.clone(),
                    });
                }
            }
            for chunk in &edge.provenance {
                store
                    .chunk_index
                    .entry(chunk.clone())
                    .or_default()
                    .edges
                    .insert(edge.id.clone());
            }
            store
                .adjacency
                .entry((edge.source.clone(), edge.target.clone()))
                .or_default()
                .insert(edge.id.clone());
            store.edges.insert(edge.id.clone(), edge);
        }

        Ok(store)
    }

    pub(crate) fn sequences(&self) -> (u64, u64) {
        (self.node_seq, self.edge_seq)
    }

    fn is_resolvable(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id) || self.session.contains(node_id)
    }

    fn next_node_id(&mut self) -> String {
        loop {
            self.node_seq += 1;
            let candidate = format!("{}{}", self.node_prefix, self.node_seq);
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn next_edge_id(&mut self) -> String {
        loop {
            self.edge_seq += 1;
            let candidate = format!("{}{}", self.edge_prefix, self.edge_seq);
            if !self.edges.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn unlink(&mut self, pair: &(String, String), edge_id: &str) {
        if let Some(ids) = self.adjacency.get_mut(pair) {
            ids.remove(edge_id);
            if ids.is_empty() {
                self.adjacency.remove(pair);
            }
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Last-write-wins per key; keys absent from `incoming` keep their value.
fn merge_attributes(existing: &mut Option<Attributes>, incoming: Option<Attributes>) {
    let Some(incoming) = incoming else {
        return;
    };
    match existing {
        Some(current) => current.extend(incoming),
        None => *existing = Some(incoming),
    }
}
