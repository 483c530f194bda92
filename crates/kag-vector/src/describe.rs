//! Deterministic text descriptions of graph elements for embedding.
//!
//! Attribute maps are rendered as JSON with keys sorted at every level,
//! `", "` / `": "` separators and non-ASCII characters escaped as `\uXXXX`,
//! so the output does not depend on map iteration order.

use std::collections::{BTreeMap, HashMap};
use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use kag_core::types::{Attributes, Entity, Relationship};

const UNKNOWN_SOURCE: &str = "Unknown Source Entity";
const UNKNOWN_TARGET: &str = "Unknown Target Entity";

/// Describe an entity.
///
/// `Some` attributes are always rendered, even when empty (`Attributes: {}`);
/// `None` omits the block.
pub fn entity_description(entity: &Entity) -> String {
    let mut description = format!("Entity: {} (Type: {})", entity.text, entity.label);
    if let Some(attributes) = &entity.attributes {
        description.push_str("\nAttributes: ");
        description.push_str(&canonical_json(attributes));
    }
    description
}

/// Describe a relationship, resolving endpoint texts through `entities`.
///
/// Endpoints missing from the lookup (or a missing lookup) fall back to
/// placeholder texts. Attributes are rendered only when non-empty.
pub fn relationship_description(
    relationship: &Relationship,
    entities: Option<&HashMap<String, Entity>>,
) -> String {
    let text_of = |id: &str| entities.and_then(|map| map.get(id)).map(|e| e.text.as_str());
    let source_text = text_of(&relationship.source_entity_id).unwrap_or(UNKNOWN_SOURCE);
    let target_text = text_of(&relationship.target_entity_id).unwrap_or(UNKNOWN_TARGET);

    let mut description = format!(
        "Relationship: '{}' {} '{}'. (ID: {})",
        source_text,
        relationship.label,
        target_text,
        relationship.id.as_deref().unwrap_or_default()
    );
    if let Some(attributes) = relationship.attributes.as_ref().filter(|a| !a.is_empty()) {
        description.push_str("\nAttributes: ");
        description.push_str(&canonical_json(attributes));
    }
    description
}

fn canonical_json(attributes: &Attributes) -> String {
    let sorted: BTreeMap<&String, Value> = attributes
        .iter()
        .map(|(key, value)| (key, sort_keys(value)))
        .collect();

    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match sorted.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => "{}".to_string(),
    }
}

/// Rebuild nested objects in key order, independent of whether
/// `serde_json::Map` preserves insertion order.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with a space after `,` and `:`, ASCII-only output.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    /// Non-ASCII characters become lowercase `\uXXXX` escapes, as UTF-16
    /// surrogate pairs outside the Basic Multilingual Plane.
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut rest = fragment;
        while let Some(pos) = rest.find(|c: char| !c.is_ascii()) {
            writer.write_all(rest[..pos].as_bytes())?;
            let mut chars = rest[pos..].chars();
            if let Some(ch) = chars.next() {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
            rest = chars.as_str();
        }
        writer.write_all(rest.as_bytes())
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
