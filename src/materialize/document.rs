// Copyright 2025 Cowboy AI, LLC.

//! Materialized documents
//!
//! Shape: `{ _id, ...values, _meta: { created, modified, touched, deleted,
//! history? } }`. Attribute names never start with `_`, so the reserved keys
//! cannot collide with them.

use super::fold::{FoldState, HistoryEntry};
use crate::errors::{TenancyError, TenancyResult};
use crate::store::{Document, ID_FIELD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved metadata key
pub const META_FIELD: &str = "_meta";

/// Path of the soft-delete flag
pub const DELETED_PATH: &str = "_meta.deleted";

/// The `_meta` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Date of the first event
    pub created: DateTime<Utc>,
    /// Date of the last event
    pub modified: DateTime<Utc>,
    /// When the document was last recomputed
    pub touched: DateTime<Utc>,
    /// Soft-delete flag
    pub deleted: bool,
    /// Folded events, when recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

/// Current state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedDocument {
    /// Entity id
    pub id: String,
    /// Folded attribute values, embeds resolved
    pub values: Map<String, Value>,
    /// Metadata
    pub meta: Meta,
}

impl MaterializedDocument {
    /// Build from a fold; `None` when no event was folded
    pub fn from_fold(id: &str, state: FoldState, touched: DateTime<Utc>, record_history: bool) -> Option<Self> {
        let (created, modified) = (state.created?, state.modified?);
        Some(Self {
            id: id.to_string(),
            values: state.values,
            meta: Meta {
                created,
                modified,
                touched,
                deleted: state.deleted,
                history: record_history.then_some(state.history),
            },
        })
    }

    /// Soft-deleted?
    pub fn is_deleted(&self) -> bool {
        self.meta.deleted
    }

    /// Stored form
    pub fn to_document(&self) -> TenancyResult<Document> {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        doc.extend(self.values.clone());
        doc.insert(META_FIELD.to_string(), serde_json::to_value(&self.meta)?);
        Ok(doc)
    }

    /// Read back a stored document
    pub fn from_document(mut doc: Document) -> TenancyResult<Self> {
        let id = match doc.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            _ => return Err(TenancyError::Serialization("materialized document has no `_id`".into())),
        };
        let meta = doc
            .remove(META_FIELD)
            .ok_or_else(|| TenancyError::Serialization(format!("materialized document `{id}` has no `_meta`")))?;
        Ok(Self {
            id,
            meta: serde_json::from_value(meta)?,
            values: doc,
        })
    }

    /// Attribute names whose values differ from `stored`
    pub fn changed_fields(&self, stored: Option<&MaterializedDocument>) -> Vec<String> {
        let Some(stored) = stored else {
            return self.values.keys().cloned().collect();
        };
        let mut changed: Vec<String> = self
            .values
            .iter()
            .filter(|(k, v)| stored.values.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(stored.values.keys().filter(|k| !self.values.contains_key(*k)).cloned());
        changed
    }

    /// Same content as `other`, ignoring `touched`
    pub fn same_content(&self, other: &MaterializedDocument) -> bool {
        self.id == other.id
            && self.values == other.values
            && self.meta.created == other.meta.created
            && self.meta.modified == other.meta.modified
            && self.meta.deleted == other.meta.deleted
            && self.meta.history == other.meta.history
    }
}
