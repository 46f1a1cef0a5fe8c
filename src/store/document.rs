// Copyright 2025 Cowboy AI, LLC.

//! Documents and dotted-path access
//!
//! A document is a JSON object keyed by `_id`. Paths are dotted
//! (`manages.org._id`); arrays met along a path are traversed element by
//! element, so a path can resolve to many values.

use serde_json::{Map, Value};

/// Identifier field present on every stored document
pub const ID_FIELD: &str = "_id";

/// A stored document
pub type Document = Map<String, Value>;

/// The `_id` of a document, when it is a string
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Split a dotted path into segments
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Every value reachable at `path`, flattening arrays on the way.
///
/// A leaf that is itself an array contributes both the array and its
/// elements, so equality can match either.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    resolve_into(root, &segments(path), &mut out);
    out
}

/// [`resolve`] starting from a document rather than a value
pub fn resolve_in<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segs = segments(path);
    let mut out = Vec::new();
    if let Some((head, tail)) = segs.split_first() {
        if let Some(next) = doc.get(*head) {
            resolve_into(next, tail, &mut out);
        }
    }
    out
}

fn resolve_into<'a>(current: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    match (rest.split_first(), current) {
        (None, Value::Array(items)) => {
            out.push(current);
            out.extend(items.iter());
        }
        (None, _) => out.push(current),
        (Some(_), Value::Array(items)) => {
            for item in items {
                resolve_into(item, rest, out);
            }
        }
        (Some((head, tail)), Value::Object(map)) => {
            if let Some(next) = map.get(*head) {
                resolve_into(next, tail, out);
            }
        }
        (Some(_), _) => {}
    }
}

/// First value at a plain object path (no array traversal)
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |current, seg| current.as_object()?.get(seg))
}

/// Set a plain object path, creating intermediate objects
pub fn set_path(root: &mut Document, path: &str, value: Value) {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        return;
    };
    let mut current = root;
    for seg in parents {
        let entry = current
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert((*last).to_string(), value);
}

/// Extract a referenced id from `"id"` or `{ "_id": "id" }`
pub fn reference_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id),
        Value::Object(map) => map.get(ID_FIELD).and_then(Value::as_str),
        _ => None,
    }
}
