use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open attribute map carried by entities and relationships.
pub type Attributes = HashMap<String, Value>;

/// Accumulated set of source-chunk ids. Ordered so that it serializes as a
/// stable list.
pub type Provenance = BTreeSet<String>;

// =============================================================================
// Records
// =============================================================================

/// An extracted entity, as handed over by the extraction stage.
///
/// `id` is optional; the graph store generates one when it is absent or blank.
/// A missing `label` or `text` deserializes as empty, and the graph store
/// rejects a blank label with a validation error for that record alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Category tag such as `PERSON` or `ORGANIZATION`.
    #[serde(default)]
    pub label: String,
    /// Surface form of the entity in the source text.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub provenance: Provenance,
}

impl Entity {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            text: text.into(),
            attributes: None,
            provenance: Provenance::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a single attribute, creating the attribute map if needed.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Tag the entity as extracted from the given chunk.
    pub fn with_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.provenance.insert(chunk_id.into());
        self
    }

    /// The caller-supplied id, treating a blank id as absent.
    pub fn resolved_id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }
}

/// An extracted directed relationship between two entities.
///
/// Endpoint ids and the label default to empty when missing from the input
/// so that the graph store can reject the record with a validation error
/// instead of the whole batch failing to deserialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub source_entity_id: String,
    #[serde(default)]
    pub target_entity_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub provenance: Provenance,
}

impl Relationship {
    pub fn new(
        source_entity_id: impl Into<String>,
        label: impl Into<String>,
        target_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            label: label.into(),
            attributes: None,
            provenance: Provenance::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.provenance.insert(chunk_id.into());
        self
    }

    pub fn resolved_id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }
}

/// One unit of extraction output: the entities and relationships found in a
/// set of chunks. This is the on-disk shape of a batch file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

fn non_blank(id: Option<&str>) -> Option<&str> {
    id.filter(|s| !s.trim().is_empty())
}
