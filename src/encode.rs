//! Wire encodings for [`StructuredRecord`]: flat dotted keys or nested
//! objects, selected per sink.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::record::StructuredRecord;

/// How a record is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Dotted keys stay at the top level: `{"user.id": "17"}`.
    #[default]
    Flat,
    /// Dotted keys expand into nested objects: `{"user": {"id": "17"}}`.
    Nested,
}

/// Render `record` as a JSON value in the requested layout.
pub fn to_value(record: &StructuredRecord, format: WireFormat) -> Value {
    match format {
        WireFormat::Flat => {
            let mut map = Map::new();
            for (key, value) in record.fields() {
                map.insert(key.clone(), value.clone());
            }
            Value::Object(map)
        }
        WireFormat::Nested => Value::Object(nest(record.fields())),
    }
}

/// Serialize `record` to JSON bytes in the requested layout.
///
/// Records only hold representable values, so the error arm is a formality
/// and falls back to an empty object rather than failing the pipeline.
pub fn to_bytes(record: &StructuredRecord, format: WireFormat) -> Vec<u8> {
    serde_json::to_vec(&to_value(record, format)).unwrap_or_else(|_| b"{}".to_vec())
}

/// Expand dotted keys into nested objects.
///
/// Keys are processed in sorted order and collisions resolve last-write-
/// wins: an intermediate node that already holds a scalar is replaced by an
/// object, and the final segment overwrites whatever sits at the leaf.
pub fn nest(flat: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (key, value) in flat {
        let mut parts: Vec<&str> = key.split('.').collect();
        let leaf = match parts.pop() {
            Some(leaf) => leaf,
            None => continue,
        };
        if parts.is_empty() {
            root.insert(leaf.to_string(), value.clone());
            continue;
        }

        let mut node = &mut root;
        for part in parts {
            let slot = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            node = slot.as_object_mut().expect("intermediate node is an object");
        }
        node.insert(leaf.to_string(), value.clone());
    }
    root
}

/// Collapse nested objects back into dotted keys; the inverse of [`nest`]
/// for collision-free maps. Empty objects are kept as leaves.
pub fn flatten(nested: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    for (key, value) in nested {
        flatten_into(key, value, &mut flat);
    }
    flat
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(&format!("{prefix}.{key}"), child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}
