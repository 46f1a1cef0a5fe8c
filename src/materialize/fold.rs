// Copyright 2025 Cowboy AI, LLC.

//! Left fold of an entity's events into its current state
//!
//! The generic reducer starts from an empty, deleted state:
//!
//! - `CREATE` merges values and clears the delete flag
//! - `UPDATE` merges values
//! - `DELETE` sets the delete flag and keeps every attribute
//! - `RESTORE` merges any values and clears the delete flag
//!
//! A custom verb without an extension folds like `UPDATE`. A custom verb with
//! an extension gets the generic bookkeeping (dates, history) and then the
//! extension alone decides the values. An extension registered for a
//! standard verb runs after the generic reducer.

use crate::event::{Event, Verb};
use crate::model::{EntityDefinition, FoldFn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One folded event as recorded in `_meta.history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Event id
    pub id: String,
    /// Folded verb
    pub command: Verb,
    /// Event date
    pub date: DateTime<Utc>,
    /// Acting user
    pub user_id: Option<String>,
}

impl From<&Event> for HistoryEntry {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            command: event.command.clone(),
            date: event.date,
            user_id: event.user_id.clone(),
        }
    }
}

/// Accumulator of the fold
#[derive(Debug, Clone, PartialEq)]
pub struct FoldState {
    /// Current attribute values
    pub values: Map<String, Value>,
    /// Soft-delete flag
    pub deleted: bool,
    /// Date of the first folded event
    pub created: Option<DateTime<Utc>>,
    /// Date of the last folded event
    pub modified: Option<DateTime<Utc>>,
    /// Folded events, when history is recorded
    pub history: Vec<HistoryEntry>,
    /// Number of folded events
    pub events: usize,
}

impl Default for FoldState {
    fn default() -> Self {
        Self {
            values: Map::new(),
            deleted: true,
            created: None,
            modified: None,
            history: Vec::new(),
            events: 0,
        }
    }
}

fn merge(values: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        values.insert(key.clone(), value.clone());
    }
}

impl FoldState {
    /// Fold one event
    pub fn apply(&mut self, event: &Event, extension: Option<&FoldFn>, record_history: bool) {
        self.created.get_or_insert(event.date);
        self.modified = Some(event.date);
        self.events += 1;
        if record_history {
            self.history.push(HistoryEntry::from(event));
        }

        match &event.command {
            Verb::Create | Verb::Restore => {
                merge(&mut self.values, &event.values);
                self.deleted = false;
            }
            Verb::Update => merge(&mut self.values, &event.values),
            Verb::Delete => self.deleted = true,
            Verb::Custom(_) => {
                if let Some(extension) = extension {
                    extension(&mut self.values, event);
                    return;
                }
                merge(&mut self.values, &event.values);
            }
        }

        if let Some(extension) = extension {
            extension(&mut self.values, event);
        }
    }

    /// Whether anything was folded
    pub fn is_empty(&self) -> bool {
        self.events == 0
    }
}

/// Fold events (already in causal order) with a definition's extensions
pub fn fold<'a>(
    definition: &EntityDefinition,
    events: impl IntoIterator<Item = &'a Event>,
    record_history: bool,
) -> FoldState {
    events.into_iter().fold(FoldState::default(), |mut state, event| {
        state.apply(event, definition.fold_for(&event.command), record_history);
        state
    })
}
