// Copyright 2025 Cowboy AI, LLC.

//! Events: immutable records of one command against one entity
//!
//! The stored shape is `{id, entityType, entityId, command, date, values,
//! userId}` plus the store-assigned `_seq` used to order events that share a
//! date. Adding verbs is backward compatible; renaming or removing one
//! breaks replay of existing logs.

use crate::errors::{TenancyError, TenancyResult};
use crate::naming::constantize;
use crate::store::{Document, ID_FIELD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// The command an event records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verb {
    /// Seeds attribute values and clears the delete flag
    Create,
    /// Merges values
    Update,
    /// Sets the delete flag, keeping attributes
    Delete,
    /// Clears the delete flag
    Restore,
    /// Entity-specific verb, folded by an extension (`MAGIC_LOGIN`)
    Custom(String),
}

impl Verb {
    /// Parse a verb name in any casing
    pub fn parse(name: &str) -> Self {
        match constantize(name).as_str() {
            "CREATE" => Verb::Create,
            "UPDATE" => Verb::Update,
            "DELETE" => Verb::Delete,
            "RESTORE" => Verb::Restore,
            other => Verb::Custom(other.to_string()),
        }
    }

    /// Stored name
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Create => "CREATE",
            Verb::Update => "UPDATE",
            Verb::Delete => "DELETE",
            Verb::Restore => "RESTORE",
            Verb::Custom(name) => name,
        }
    }

    /// One of the four built-in verbs
    pub fn is_standard(&self) -> bool {
        !matches!(self, Verb::Custom(_))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Verb {
    fn from(name: String) -> Self {
        Verb::parse(&name)
    }
}

impl From<&str> for Verb {
    fn from(name: &str) -> Self {
        Verb::parse(name)
    }
}

impl From<Verb> for String {
    fn from(verb: Verb) -> Self {
        verb.as_str().to_string()
    }
}

/// A validated command waiting to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct EventInput {
    /// Entity key (`organization`)
    pub entity_type: String,
    /// Entity instance id
    pub entity_id: String,
    /// Recorded verb
    pub command: Verb,
    /// When the command happened
    pub date: DateTime<Utc>,
    /// Validated values
    pub values: Map<String, Value>,
    /// Acting user
    pub user_id: Option<String>,
}

impl EventInput {
    /// Check the shape before it reaches the log
    pub fn validate(&self) -> TenancyResult<()> {
        let mut errors = Vec::new();
        if self.entity_type.trim().is_empty() {
            errors.push(crate::errors::FieldError::new("entityType", "is required"));
        }
        if self.entity_id.trim().is_empty() {
            errors.push(crate::errors::FieldError::new("entityId", "is required"));
        }
        if let Verb::Custom(name) = &self.command {
            if name.is_empty() {
                errors.push(crate::errors::FieldError::new("command", "is required"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TenancyError::Validation(errors))
        }
    }
}

/// An appended event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event id
    pub id: String,
    /// Entity key
    pub entity_type: String,
    /// Entity instance id
    pub entity_id: String,
    /// Recorded verb
    pub command: Verb,
    /// When the command happened
    pub date: DateTime<Utc>,
    /// Validated values
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Acting user
    #[serde(default)]
    pub user_id: Option<String>,
    /// Insertion order assigned by the store
    #[serde(rename = "_seq", default)]
    pub seq: u64,
}

impl Event {
    /// Stamp an input with a fresh id and its insertion sequence
    pub fn from_input(input: EventInput, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type: input.entity_type,
            entity_id: input.entity_id,
            command: input.command,
            date: input.date,
            values: input.values,
            user_id: input.user_id,
            seq,
        }
    }

    /// Causal order: date, then insertion order
    pub fn causal_cmp(&self, other: &Event) -> Ordering {
        self.date.cmp(&other.date).then(self.seq.cmp(&other.seq))
    }

    /// Stored form, keyed by the event id
    pub fn to_document(&self) -> TenancyResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(mut doc) => {
                doc.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
                Ok(doc)
            }
            _ => Err(TenancyError::Serialization("event did not serialize to an object".into())),
        }
    }

    /// Read an event back from its stored form
    pub fn from_document(doc: Document) -> TenancyResult<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}
