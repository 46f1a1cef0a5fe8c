// Copyright 2025 Cowboy AI, LLC.

//! Request-facing repos
//!
//! [`Repos`] wires the registry, the event log, the materializer and the
//! cascade together once per process. [`EntityRepo`] runs a command for one
//! entity type as a single unit: for persisted entities the append, the
//! materialization and every hook share one transaction; read-path entities
//! are folded on demand and never written.

use crate::cascade::{CascadePropagator, MaterializeHook};
use crate::command::{CommandHandler, CommandPayload, OneOrMany};
use crate::config::{SharedClock, StoreConfig, SystemClock};
use crate::errors::{TenancyError, TenancyResult};
use crate::event::{Event, Verb};
use crate::event_store::{DocumentEventStore, EventStore};
use crate::materialize::{MaterializeOutcome, MaterializedDocument, Materializer, DELETED_PATH};
use crate::model::{EntityDefinition, ModelRegistry};
use crate::store::{Database, Filter, Transaction};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Events appended by a command and the resulting documents
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    /// Appended events, in order
    pub events: Vec<Event>,
    /// Current documents of the affected ids
    pub documents: Vec<MaterializedDocument>,
}

impl CommandResult {
    /// The only document, for single-payload commands
    pub fn document(&self) -> Option<&MaterializedDocument> {
        self.documents.first()
    }
}

/// Builder for [`Repos`]
#[derive(Debug)]
pub struct ReposBuilder {
    registry: ModelRegistry,
    db: Option<Database>,
    config: Option<StoreConfig>,
    clock: Option<SharedClock>,
    store: Option<Arc<dyn EventStore>>,
    hooks: Vec<(String, Arc<dyn MaterializeHook>)>,
}

impl ReposBuilder {
    /// Use an existing database
    pub fn database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Override the store configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the clock
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a different event log
    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run an extra hook after materializing `entity_type`
    pub fn hook(mut self, entity_type: &str, hook: Arc<dyn MaterializeHook>) -> Self {
        self.hooks.push((entity_type.to_string(), hook));
        self
    }

    /// Wire everything together
    pub fn build(self) -> TenancyResult<Repos> {
        let registry = Arc::new(self.registry);
        let db = self.db.unwrap_or_default();
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(DocumentEventStore::new(db.clone(), config.clone())));

        let cascade = Arc::new(CascadePropagator::from_registry(&registry, db.clone(), &config));
        let mut materializer = Materializer::new(registry.clone(), db.clone(), store.clone(), config.clone(), clock.clone());
        for def in registry.entities() {
            if !cascade.plan_for(&def.key).is_empty() {
                materializer = materializer.with_hook(&def.key, cascade.clone())?;
            }
        }
        for (entity_type, hook) in self.hooks {
            materializer = materializer.with_hook(&entity_type, hook)?;
        }

        let handlers = registry
            .entities()
            .map(|def| {
                (
                    def.key.clone(),
                    CommandHandler::new(def.clone(), store.clone(), clock.clone()),
                )
            })
            .collect();

        Ok(Repos {
            registry,
            db,
            store,
            materializer,
            handlers,
            config,
        })
    }
}

/// Every repo of a model
#[derive(Debug, Clone)]
pub struct Repos {
    registry: Arc<ModelRegistry>,
    db: Database,
    store: Arc<dyn EventStore>,
    materializer: Materializer,
    handlers: HashMap<String, CommandHandler>,
    config: StoreConfig,
}

impl Repos {
    /// Start configuring repos for a registry
    pub fn builder(registry: ModelRegistry) -> ReposBuilder {
        ReposBuilder {
            registry,
            db: None,
            config: None,
            clock: None,
            store: None,
            hooks: Vec::new(),
        }
    }

    /// Model in use
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Event log
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Materialization engine
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Repo for an entity, by any casing of its name
    pub fn repo(&self, name: &str) -> TenancyResult<EntityRepo<'_>> {
        let definition = self.registry.get(name)?.clone();
        let handler = self
            .handlers
            .get(&definition.key)
            .ok_or_else(|| TenancyError::configuration(format!("No handler for `{}`", definition.name)))?;
        Ok(EntityRepo {
            repos: self,
            definition,
            handler,
        })
    }

    /// Materialize ids of an entity type (running its hooks)
    pub async fn materialize(
        &self,
        entity_type: &str,
        ids: &[String],
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        self.materializer.materialize(entity_type, ids, tx).await
    }

    /// Rebuild every document of an entity type
    pub async fn materialize_all(
        &self,
        entity_type: &str,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        self.materializer.materialize_all(entity_type, tx).await
    }

    /// Declare the event-log indexes of every entity type
    pub async fn create_indexes(&self) -> TenancyResult<()> {
        for def in self.registry.entities() {
            self.store.create_indexes(&def.key).await?;
        }
        info!(entities = self.registry.entities().count(), "Event indexes created");
        Ok(())
    }
}

enum Mode {
    Execute(Verb),
    CreateOrRestore,
}

/// Commands and queries for one entity type
#[derive(Debug, Clone)]
pub struct EntityRepo<'a> {
    repos: &'a Repos,
    definition: Arc<EntityDefinition>,
    handler: &'a CommandHandler,
}

impl EntityRepo<'_> {
    /// Entity handled
    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Create entities
    pub async fn create(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::Execute(Verb::Create), payloads.into(), tx).await
    }

    /// Update entities
    pub async fn update(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::Execute(Verb::Update), payloads.into(), tx).await
    }

    /// Soft-delete entities
    pub async fn delete(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::Execute(Verb::Delete), payloads.into(), tx).await
    }

    /// Undo soft deletes
    pub async fn restore(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::Execute(Verb::Restore), payloads.into(), tx).await
    }

    /// Create, restoring ids that were created before
    pub async fn create_or_restore(
        &self,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::CreateOrRestore, payloads.into(), tx).await
    }

    /// Run any verb, custom ones included
    pub async fn execute(
        &self,
        verb: &str,
        payloads: impl Into<OneOrMany<CommandPayload>>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        self.apply(Mode::Execute(Verb::parse(verb)), payloads.into(), tx).await
    }

    async fn append(
        &self,
        mode: Mode,
        payloads: OneOrMany<CommandPayload>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Event>> {
        match mode {
            Mode::Execute(verb) => self.handler.execute(verb, payloads, tx).await,
            Mode::CreateOrRestore => self.handler.create_or_restore(payloads, tx).await,
        }
    }

    async fn apply(
        &self,
        mode: Mode,
        payloads: OneOrMany<CommandPayload>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<CommandResult> {
        let key = self.definition.key.as_str();
        let materializer = &self.repos.materializer;

        if !self.definition.persisted {
            let events = self.append(mode, payloads, tx).await?;
            let documents = materializer.build(key, &touched_ids(&events), tx).await?;
            return Ok(CommandResult { events, documents });
        }

        self.repos
            .db
            .with_transaction(tx, |tx| async move {
                let events = self.append(mode, payloads, Some(&tx)).await?;
                let outcomes = materializer.materialize(key, &touched_ids(&events), Some(&tx)).await?;
                Ok(CommandResult {
                    events,
                    documents: outcomes.into_iter().map(|o| o.document).collect(),
                })
            })
            .await
    }

    /// Current document, unless missing or soft-deleted
    pub async fn find_by_id(&self, id: &str, tx: Option<&Transaction>) -> TenancyResult<Option<MaterializedDocument>> {
        let doc = if self.definition.persisted {
            let collection = self.collection();
            self.repos
                .db
                .find_by_id(&collection, id, tx)
                .await?
                .map(MaterializedDocument::from_document)
                .transpose()?
        } else {
            self.repos
                .materializer
                .build(&self.definition.key, &[id.to_string()], tx)
                .await?
                .pop()
        };
        Ok(doc.filter(|d| !d.is_deleted()))
    }

    /// Like [`find_by_id`](Self::find_by_id), failing with `NotFound`
    pub async fn find_by_id_strict(&self, id: &str, tx: Option<&Transaction>) -> TenancyResult<MaterializedDocument> {
        self.find_by_id(id, tx).await?.ok_or_else(|| TenancyError::NotFound {
            entity_type: self.definition.key.clone(),
            id: id.to_string(),
        })
    }

    /// Documents matching `filter`, soft-deleted ones excluded
    pub async fn find(&self, filter: Filter, tx: Option<&Transaction>) -> TenancyResult<Vec<MaterializedDocument>> {
        let filter = filter.and(Filter::ne(DELETED_PATH, true));
        if self.definition.persisted {
            return self
                .repos
                .db
                .find(&self.collection(), &filter, tx)
                .await?
                .into_iter()
                .map(MaterializedDocument::from_document)
                .collect();
        }

        let ids = self.repos.store.entity_ids(&self.definition.key, tx).await?;
        let mut found = Vec::new();
        for doc in self.repos.materializer.build(&self.definition.key, &ids, tx).await? {
            if filter.matches(&doc.to_document()?) {
                found.push(doc);
            }
        }
        Ok(found)
    }

    /// First document matching `filter`
    pub async fn find_one(&self, filter: Filter, tx: Option<&Transaction>) -> TenancyResult<Option<MaterializedDocument>> {
        Ok(self.find(filter, tx).await?.into_iter().next())
    }

    fn collection(&self) -> String {
        self.repos.config.materialized_collection(&self.definition.collection)
    }
}

fn touched_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.entity_id.clone())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedClock;
    use crate::model::{EntityBuilder, Prop};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn repos() -> Repos {
        let org = EntityBuilder::new("organization")
            .unwrap()
            .props([("name", Prop::string().required()), ("slug", Prop::slug())])
            .unwrap()
            .build()
            .unwrap();
        let tag = EntityBuilder::new("tag")
            .unwrap()
            .props([("label", Prop::string().required())])
            .unwrap()
            .persisted(false)
            .unwrap()
            .build()
            .unwrap();
        let registry = ModelRegistry::builder()
            .entity(org)
            .unwrap()
            .entity(tag)
            .unwrap()
            .build()
            .unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Repos::builder(registry).clock(Arc::new(clock)).build().unwrap()
    }

    #[tokio::test]
    async fn test_create_materializes_in_one_step() {
        let repos = repos();
        let orgs = repos.repo("organizations").unwrap();
        let result = orgs
            .create(CommandPayload::new("o1").value("name", "Acme"), None)
            .await
            .unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.document().unwrap().values["name"], json!("Acme"));

        let found = orgs.find_by_id_strict("o1", None).await.unwrap();
        assert_eq!(found.values["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn test_deleted_documents_are_hidden() {
        let repos = repos();
        let orgs = repos.repo("organization").unwrap();
        orgs.create(CommandPayload::new("o1").value("name", "Acme"), None)
            .await
            .unwrap();
        orgs.delete(CommandPayload::new("o1"), None).await.unwrap();

        assert!(orgs.find_by_id("o1", None).await.unwrap().is_none());
        assert!(orgs.find_by_id_strict("o1", None).await.unwrap_err().is_not_found());
        assert!(orgs.find(Filter::All, None).await.unwrap().is_empty());

        orgs.restore(CommandPayload::new("o1"), None).await.unwrap();
        assert_eq!(orgs.find(Filter::eq("name", "Acme"), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_path_entity_is_never_written() {
        let repos = repos();
        let tags = repos.repo("tag").unwrap();
        let result = tags
            .create(CommandPayload::new("t1").value("label", "vip"), None)
            .await
            .unwrap();
        assert_eq!(result.document().unwrap().values["label"], json!("vip"));
        assert!(repos.database().collection_names().await.iter().all(|c| c != "tags"));

        let found = tags.find_one(Filter::eq("label", "vip"), None).await.unwrap();
        assert_eq!(found.unwrap().id, "t1");
        assert!(repos.materialize("tag", &["t1".into()], None).await.is_err());
    }

    #[tokio::test]
    async fn test_caller_transaction_is_joined() {
        let repos = repos();
        let orgs = repos.repo("organization").unwrap();
        let tx = repos.database().start_transaction();
        orgs.create(CommandPayload::new("o1").value("name", "Acme"), Some(&tx))
            .await
            .unwrap();
        assert!(orgs.find_by_id("o1", None).await.unwrap().is_none());
        assert!(orgs.find_by_id("o1", Some(&tx)).await.unwrap().is_some());
        tx.commit().await.unwrap();
        assert!(orgs.find_by_id("o1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validation_error_surfaces_unchanged() {
        let repos = repos();
        let orgs = repos.repo("organization").unwrap();
        let err = orgs.create(CommandPayload::new("o1"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: `values.name` is required");
        assert!(repos.event_store().entity_ids("organization", None).await.unwrap().is_empty());
    }
}
