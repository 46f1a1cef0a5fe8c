// Copyright 2025 Cowboy AI, LLC.

//! Targeted field updates with positional array filters
//!
//! A set path may contain `$[ident]` segments. Each one walks into an array
//! and only descends into elements matched by the array filter named
//! `ident`; `$[]` descends into every element. This is how one element of
//! a membership list is updated in place by matching its embedded id.

use super::document::Document;
use super::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Array filter bound to an identifier used in `$[ident]` path segments.
///
/// The filter's paths are relative to the array element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayFilter {
    /// Identifier referenced from the set path
    pub ident: String,
    /// Predicate over the element
    pub filter: Filter,
}

/// A set of field assignments applied to every matched document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// `(path, value)` assignments
    pub set: Vec<(String, Value)>,
    /// Filters for the `$[ident]` segments of the paths
    pub array_filters: Vec<ArrayFilter>,
}

impl FieldUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assignment
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.push((path.into(), value));
        self
    }

    /// Bind an array filter
    pub fn array_filter(mut self, ident: impl Into<String>, filter: Filter) -> Self {
        self.array_filters.push(ArrayFilter {
            ident: ident.into(),
            filter,
        });
        self
    }

    /// Whether there is nothing to assign
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Apply to a document, returning whether anything changed
    pub fn apply(&self, doc: &mut Document) -> bool {
        let filters: HashMap<&str, &Filter> = self
            .array_filters
            .iter()
            .map(|f| (f.ident.as_str(), &f.filter))
            .collect();
        let mut changed = false;
        for (path, value) in &self.set {
            let segs: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            changed |= set_in_map(doc, &segs, value, &filters);
        }
        changed
    }
}

fn positional(seg: &str) -> Option<&str> {
    seg.strip_prefix("$[")?.strip_suffix(']')
}

fn set_in_map(map: &mut Map<String, Value>, segs: &[&str], value: &Value, filters: &HashMap<&str, &Filter>) -> bool {
    let Some((head, tail)) = segs.split_first() else {
        return false;
    };
    if positional(head).is_some() {
        // a positional segment only applies to arrays
        return false;
    }
    if tail.is_empty() {
        if map.get(*head) == Some(value) {
            return false;
        }
        map.insert((*head).to_string(), value.clone());
        return true;
    }
    let next_is_positional = tail.first().and_then(|s| positional(s)).is_some();
    let entry = map.entry((*head).to_string()).or_insert_with(|| {
        if next_is_positional {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    });
    set_in_value(entry, tail, value, filters)
}

fn set_in_value(current: &mut Value, segs: &[&str], value: &Value, filters: &HashMap<&str, &Filter>) -> bool {
    let Some((head, tail)) = segs.split_first() else {
        return false;
    };
    match (positional(head), current) {
        (Some(ident), Value::Array(items)) => {
            let mut changed = false;
            for item in items.iter_mut() {
                let selected = ident.is_empty()
                    || filters.get(ident).is_some_and(|f| f.matches_value(item));
                if !selected {
                    continue;
                }
                if tail.is_empty() {
                    if item != value {
                        *item = value.clone();
                        changed = true;
                    }
                } else {
                    changed |= set_in_value(item, tail, value, filters);
                }
            }
            changed
        }
        (Some(_), _) => false,
        (None, Value::Object(map)) => set_in_map(map, segs, value, filters),
        (None, other) => {
            let mut map = Map::new();
            let changed = set_in_map(&mut map, segs, value, filters);
            if changed {
                *other = Value::Object(map);
            }
            changed
        }
    }
}
