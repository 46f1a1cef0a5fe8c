// Copyright 2025 Cowboy AI, LLC.

//! Command handling
//!
//! A [`CommandHandler`] validates payloads against the per-verb schema of
//! its entity and appends one event per payload. It never touches
//! materialized state; materialization is a separate, explicit step.

use crate::config::{Clock, SharedClock};
use crate::errors::{FieldError, TenancyError, TenancyResult};
use crate::event::{Event, EventInput, Verb};
use crate::event_store::{AppendOutcome, EventStore};
use crate::model::EntityDefinition;
use crate::store::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One command against one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    /// Target entity id
    pub entity_id: String,
    /// When the command happened (defaults to the clock)
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Values validated against the verb's schema
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Acting user
    #[serde(default)]
    pub user_id: Option<String>,
}

impl CommandPayload {
    /// Payload for an existing id
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            date: None,
            values: Map::new(),
            user_id: None,
        }
    }

    /// Payload for a new entity with a generated id
    pub fn generated() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Set one value
    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Replace the values with the fields of a JSON object
    pub fn values(mut self, values: Value) -> Self {
        if let Value::Object(map) = values {
            self.values = map;
        }
        self
    }

    /// Set the command date
    pub fn at(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the acting user
    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// One payload or a batch
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<T> {
    /// A single item
    One(T),
    /// A batch
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Items as a list
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }

    /// Whether this is a batch
    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        OneOrMany::Many(items)
    }
}

/// Validates commands for one entity type and appends their events
#[derive(Debug, Clone)]
pub struct CommandHandler {
    definition: Arc<EntityDefinition>,
    store: Arc<dyn EventStore>,
    clock: SharedClock,
}

impl CommandHandler {
    /// Create a handler
    pub fn new(definition: Arc<EntityDefinition>, store: Arc<dyn EventStore>, clock: SharedClock) -> Self {
        Self {
            definition,
            store,
            clock,
        }
    }

    /// Entity handled
    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Append CREATE events; a second CREATE for an id is a conflict
    pub async fn create(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        self.execute(Verb::Create, payloads, tx).await
    }

    /// Append UPDATE events
    pub async fn update(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        self.execute(Verb::Update, payloads, tx).await
    }

    /// Append DELETE events
    pub async fn delete(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        self.execute(Verb::Delete, payloads, tx).await
    }

    /// Append RESTORE events
    pub async fn restore(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        self.execute(Verb::Restore, payloads, tx).await
    }

    /// Validate every payload for `verb`, then append them in order
    pub async fn execute(
        &self,
        verb: Verb,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        let inputs = self.validate_all(&verb, payloads.into())?;
        let mut events = Vec::with_capacity(inputs.len());
        for input in inputs {
            let outcome = self.store.append(input, tx).await?;
            events.push(outcome.into_result(&self.definition.key)?);
        }
        Ok(events)
    }

    /// Create, or restore when the id already has a CREATE event.
    ///
    /// The caller only sees the appended events, never the conflict.
    pub async fn create_or_restore(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        let payloads = payloads.into();
        let inputs = self.validate_all(&Verb::Create, payloads.clone())?;

        let mut events = Vec::with_capacity(inputs.len());
        for (input, payload) in inputs.into_iter().zip(payloads.into_vec()) {
            match self.store.append(input, tx).await? {
                AppendOutcome::Appended(event) => events.push(event),
                AppendOutcome::Conflict { entity_id, index } => {
                    warn!(
                        entity_type = %self.definition.key,
                        entity_id = %entity_id,
                        index = %index,
                        "Create conflicted, restoring instead"
                    );
                    let restore = self.to_input(&Verb::Restore, payload)?;
                    let outcome = self.store.append(restore, tx).await?;
                    events.push(outcome.into_result(&self.definition.key)?);
                }
            }
        }
        Ok(events)
    }

    fn to_input(&self, verb: &Verb, payload: CommandPayload) -> TenancyResult<EventInput> {
        let mut errors = Vec::new();
        if payload.entity_id.trim().is_empty() {
            errors.push(FieldError::new("entityId", "is required"));
        }
        let values = match self.definition.validate(verb, &payload.values) {
            Ok(values) => values,
            Err(TenancyError::Validation(fields)) => {
                errors.extend(fields);
                Map::new()
            }
            Err(other) => return Err(other),
        };
        if !errors.is_empty() {
            return Err(TenancyError::Validation(errors));
        }
        Ok(EventInput {
            entity_type: self.definition.key.clone(),
            entity_id: payload.entity_id.trim().to_string(),
            command: verb.clone(),
            date: payload.date.unwrap_or_else(|| self.clock.now()),
            values,
            user_id: payload.user_id,
        })
    }

    fn validate_all(&self, verb: &Verb, payloads: OneOrMany<CommandPayload>) -> TenancyResult<Vec<EventInput>> {
        let batch = payloads.is_many();
        let mut inputs = Vec::new();
        let mut errors = Vec::new();
        for (i, payload) in payloads.into_vec().into_iter().enumerate() {
            match self.to_input(verb, payload) {
                Ok(input) => inputs.push(input),
                Err(TenancyError::Validation(fields)) if batch => {
                    errors.extend(
                        fields
                            .into_iter()
                            .map(|f| FieldError::new(format!("[{i}].{}", f.path), f.message)),
                    );
                }
                Err(other) => return Err(other),
            }
        }
        if !errors.is_empty() {
            return Err(TenancyError::Validation(errors));
        }
        debug!(
            entity_type = %self.definition.key,
            command = %verb,
            count = inputs.len(),
            "Commands validated"
        );
        Ok(inputs)
    }
}
