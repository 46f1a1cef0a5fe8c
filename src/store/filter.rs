// Copyright 2025 Cowboy AI, LLC.

//! Query filters over documents

use super::document::{resolve, resolve_in, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over a document, evaluated on dotted paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every document
    All,
    /// Any value at the path equals
    Eq(String, Value),
    /// No value at the path equals
    Ne(String, Value),
    /// Any value at the path is in the list
    In(String, Vec<Value>),
    /// The path resolves (or not) to at least one value
    Exists(String, bool),
    /// Every filter matches
    And(Vec<Filter>),
    /// At least one filter matches
    Or(Vec<Filter>),
}

impl Filter {
    /// `path == value`
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    /// `path != value`
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(path.into(), value.into())
    }

    /// `path in values`
    pub fn any_of<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(path.into(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction, flattening nested `And`s and dropping `All`
    pub fn and(self, other: Filter) -> Self {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Evaluate against a JSON value
    pub fn matches_value(&self, value: &Value) -> bool {
        self.matches_with(&|path| resolve(value, path))
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_with(&|path| resolve_in(doc, path))
    }

    fn matches_with<'a>(&self, lookup: &impl Fn(&str) -> Vec<&'a Value>) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, expected) => lookup(path).into_iter().any(|v| v == expected),
            Filter::Ne(path, expected) => !lookup(path).into_iter().any(|v| v == expected),
            Filter::In(path, candidates) => lookup(path).into_iter().any(|v| candidates.contains(v)),
            Filter::Exists(path, wanted) => lookup(path).is_empty() != *wanted,
            Filter::And(filters) => filters.iter().all(|f| f.matches_with(lookup)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches_with(lookup)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_matches_any_array_element() {
        let d = doc(json!({ "manages": [{ "org": { "_id": "o1" } }, { "org": { "_id": "o2" } }] }));
        assert!(Filter::eq("manages.org._id", "o2").matches(&d));
        assert!(!Filter::eq("manages.org._id", "o3").matches(&d));
    }

    #[test]
    fn test_ne_requires_no_match() {
        let d = doc(json!({ "name": "Acme" }));
        assert!(Filter::ne("name", "Beta").matches(&d));
        assert!(!Filter::ne("name", "Acme").matches(&d));
        assert!(Filter::ne("missing", "x").matches(&d));
    }

    #[test]
    fn test_in_and_exists() {
        let d = doc(json!({ "_id": "w1", "application": { "_id": "a1" } }));
        assert!(Filter::any_of("application._id", ["a0", "a1"]).matches(&d));
        assert!(Filter::Exists("application".into(), true).matches(&d));
        assert!(Filter::Exists("org".into(), false).matches(&d));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::All
            .and(Filter::eq("a", 1))
            .and(Filter::eq("b", 2).and(Filter::eq("c", 3)));
        assert_eq!(
            f,
            Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2), Filter::eq("c", 3)])
        );
    }
}
