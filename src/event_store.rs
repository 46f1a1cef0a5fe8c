// Copyright 2025 Cowboy AI, LLC.

//! Append-only event log
//!
//! One collection per entity type. The store offers append and reads only;
//! there is no operation that changes or removes an appended event. A
//! uniqueness violation on append comes back as [`AppendOutcome::Conflict`]
//! so callers can branch on it instead of catching an error.

use crate::config::StoreConfig;
use crate::errors::{TenancyError, TenancyResult};
use crate::event::{Event, EventInput, Verb};
use crate::store::{Database, Filter, IndexSpec, InsertOutcome, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Name of the partial unique index guarding CREATE events
pub const CREATE_INDEX: &str = "entityId_create";

/// Result of an append
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The event is in the log
    Appended(Event),
    /// A unique index rejected the event
    Conflict {
        /// Entity id that collided
        entity_id: String,
        /// Violated index
        index: String,
    },
}

impl AppendOutcome {
    /// Turn a conflict into [`TenancyError::Conflict`]
    pub fn into_result(self, entity_type: &str) -> TenancyResult<Event> {
        match self {
            AppendOutcome::Appended(event) => Ok(event),
            AppendOutcome::Conflict { entity_id, index } => Err(TenancyError::Conflict {
                entity_type: entity_type.to_string(),
                entity_id,
                index,
            }),
        }
    }

    /// Whether the append was rejected
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppendOutcome::Conflict { .. })
    }
}

/// Event log trait for appending and reading entity histories
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Append one event
    async fn append(&self, input: EventInput, tx: Option<&Transaction>) -> TenancyResult<AppendOutcome>;

    /// Events for the given ids in causal order
    async fn events_for(
        &self,
        entity_type: &str,
        entity_ids: &[String],
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>>;

    /// Every entity id with at least one event, sorted
    async fn entity_ids(&self, entity_type: &str, tx: Option<&Transaction>) -> TenancyResult<Vec<String>>;

    /// Declare the indexes of an entity type's log
    async fn create_indexes(&self, entity_type: &str) -> TenancyResult<()>;
}

/// Event log kept in document collections (`{entity}-events`)
///
/// The indexes of a type's log are declared on its first append, once.
#[derive(Debug, Clone)]
pub struct DocumentEventStore {
    db: Database,
    config: StoreConfig,
    indexed: Arc<Mutex<HashSet<String>>>,
}

impl DocumentEventStore {
    /// Create a store over `db`
    pub fn new(db: Database, config: StoreConfig) -> Self {
        Self {
            db,
            config,
            indexed: Arc::default(),
        }
    }

    fn is_indexed(&self, entity_type: &str) -> bool {
        self.indexed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(entity_type)
    }

    /// Underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::unique(CREATE_INDEX, &["entityId"])
            .partial(Filter::eq("command", Verb::Create.as_str()))]
    }
}

#[async_trait]
impl EventStore for DocumentEventStore {
    async fn append(&self, input: EventInput, tx: Option<&Transaction>) -> TenancyResult<AppendOutcome> {
        input.validate()?;
        if !self.is_indexed(&input.entity_type) {
            self.create_indexes(&input.entity_type).await?;
        }

        let collection = self.config.event_collection(&input.entity_type);
        let event = Event::from_input(input, self.db.next_sequence());
        let doc = event.to_document()?;

        match self.db.insert_one(&collection, doc, tx).await? {
            InsertOutcome::Inserted => {
                debug!(
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    command = %event.command,
                    seq = event.seq,
                    "Event appended"
                );
                Ok(AppendOutcome::Appended(event))
            }
            InsertOutcome::DuplicateKey { index } => {
                debug!(
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    index = %index,
                    "Append rejected by unique index"
                );
                Ok(AppendOutcome::Conflict {
                    entity_id: event.entity_id,
                    index,
                })
            }
        }
    }

    async fn events_for(
        &self,
        entity_type: &str,
        entity_ids: &[String],
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        let collection = self.config.event_collection(entity_type);
        let filter = Filter::any_of("entityId", entity_ids.iter().cloned());
        let mut events = self
            .db
            .find(&collection, &filter, tx)
            .await?
            .into_iter()
            .map(Event::from_document)
            .collect::<TenancyResult<Vec<_>>>()?;
        events.sort_by(Event::causal_cmp);
        Ok(events)
    }

    async fn entity_ids(&self, entity_type: &str, tx: Option<&Transaction>) -> TenancyResult<Vec<String>> {
        let collection = self.config.event_collection(entity_type);
        let ids = self.db.distinct(&collection, "entityId", &Filter::All, tx).await?;
        let mut ids: Vec<String> = ids
            .into_iter()
            .filter_map(|v| match v {
                Value::String(id) => Some(id),
                _ => None,
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_indexes(&self, entity_type: &str) -> TenancyResult<()> {
        let collection = self.config.event_collection(entity_type);
        for spec in Self::index_specs() {
            self.db.create_index(&collection, spec).await;
        }
        self.indexed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity_type.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Map};

    fn input(id: &str, command: Verb, minute: i64) -> EventInput {
        EventInput {
            entity_type: "member".into(),
            entity_id: id.into(),
            command,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
            values: Map::new(),
            user_id: None,
        }
    }

    fn store() -> DocumentEventStore {
        DocumentEventStore::new(Database::new(), StoreConfig::default())
    }

    #[tokio::test]
    async fn test_second_create_conflicts() {
        let store = store();
        let first = store.append(input("m1", Verb::Create, 0), None).await.unwrap();
        assert!(matches!(first, AppendOutcome::Appended(_)));

        store.append(input("m1", Verb::Delete, 1), None).await.unwrap();
        let second = store.append(input("m1", Verb::Create, 2), None).await.unwrap();
        assert_eq!(
            second,
            AppendOutcome::Conflict {
                entity_id: "m1".into(),
                index: CREATE_INDEX.into()
            }
        );
        let err = second.into_result("member").unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_indexes_declared_on_first_append() {
        let store = store();
        assert!(!store.is_indexed("member"));
        assert!(store.database().indexes("member-events").await.is_empty());

        store.append(input("m1", Verb::Create, 0), None).await.unwrap();
        store.append(input("m1", Verb::Update, 1), None).await.unwrap();
        assert!(store.is_indexed("member"));
        let indexes = store.database().indexes("member-events").await;
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, CREATE_INDEX);
    }

    #[tokio::test]
    async fn test_events_in_causal_order() {
        let store = store();
        store.append(input("m1", Verb::Update, 5), None).await.unwrap();
        store.append(input("m1", Verb::Create, 0), None).await.unwrap();
        store.append(input("m2", Verb::Create, 1), None).await.unwrap();
        store.append(input("m1", Verb::Delete, 5), None).await.unwrap();

        let events = store.events_for("member", &["m1".into()], None).await.unwrap();
        let commands: Vec<_> = events.iter().map(|e| e.command.as_str()).collect();
        assert_eq!(commands, vec!["CREATE", "UPDATE", "DELETE"]);
    }

    #[tokio::test]
    async fn test_log_only_grows() {
        let store = store();
        store.append(input("m1", Verb::Create, 0), None).await.unwrap();
        let before = store.events_for("member", &["m1".into()], None).await.unwrap();

        store.append(input("m1", Verb::Create, 1), None).await.unwrap();
        store.append(input("m1", Verb::Update, 2), None).await.unwrap();
        let after = store.events_for("member", &["m1".into()], None).await.unwrap();

        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[0], before[0]);
    }

    #[tokio::test]
    async fn test_entity_ids_and_rejected_shape() {
        let store = store();
        store.append(input("m1", Verb::Create, 0), None).await.unwrap();
        store.append(input("m2", Verb::Create, 0), None).await.unwrap();
        assert_eq!(store.entity_ids("member", None).await.unwrap(), vec!["m1", "m2"]);

        let err = store.append(input("", Verb::Create, 0), None).await.unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_append_in_transaction_is_discarded_on_abort() {
        let store = store();
        let tx = store.database().start_transaction();
        let mut values = Map::new();
        values.insert("role".into(), json!("Owner"));
        let mut with_values = input("m1", Verb::Create, 0);
        with_values.values = values;
        store.append(with_values, Some(&tx)).await.unwrap();
        assert_eq!(store.events_for("member", &["m1".into()], Some(&tx)).await.unwrap().len(), 1);
        tx.abort();
        assert!(store.events_for("member", &["m1".into()], None).await.unwrap().is_empty());
    }
}
