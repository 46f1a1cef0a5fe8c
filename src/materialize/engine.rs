// Copyright 2025 Cowboy AI, LLC.

//! Materialization engine
//!
//! Reads every event of the requested ids, folds them, resolves embedded
//! snapshots from the targets' materialized documents and (with the merge
//! stage) upserts the result. Hooks registered for the entity type run in
//! the same transaction as the writes, so a failing hook leaves nothing
//! behind.

use super::document::MaterializedDocument;
use super::fold::fold;
use crate::cascade::MaterializeHook;
use crate::config::{Clock, SharedClock, StoreConfig};
use crate::errors::{TenancyError, TenancyResult};
use crate::event::Event;
use crate::event_store::EventStore;
use crate::model::{EntityDefinition, ModelRegistry, Relationship};
use crate::store::{reference_id, Database, Document, Transaction, ID_FIELD};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of materializing one id
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOutcome {
    /// Entity key
    pub entity_type: String,
    /// Entity id
    pub entity_id: String,
    /// Current document (the stored one when nothing changed)
    pub document: MaterializedDocument,
    /// Attribute names that differ from the previously stored document
    pub changed_fields: Vec<String>,
    /// Whether the merge stage wrote the document
    pub written: bool,
}

/// Folds event histories into materialized documents
#[derive(Debug, Clone)]
pub struct Materializer {
    registry: Arc<ModelRegistry>,
    db: Database,
    store: Arc<dyn EventStore>,
    config: StoreConfig,
    clock: SharedClock,
    hooks: HashMap<String, Vec<Arc<dyn MaterializeHook>>>,
}

impl Materializer {
    /// Create an engine without hooks
    pub fn new(
        registry: Arc<ModelRegistry>,
        db: Database,
        store: Arc<dyn EventStore>,
        config: StoreConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            db,
            store,
            config,
            clock,
            hooks: HashMap::new(),
        }
    }

    /// Run `hook` after every materialization of `entity_type`
    pub fn with_hook(mut self, entity_type: &str, hook: Arc<dyn MaterializeHook>) -> TenancyResult<Self> {
        let key = self.registry.get(entity_type)?.key.clone();
        self.hooks.entry(key).or_default().push(hook);
        Ok(self)
    }

    /// Hooks registered for an entity type
    pub fn hooks_for(&self, entity_type: &str) -> &[Arc<dyn MaterializeHook>] {
        self.hooks.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }

    /// Fold and resolve without writing; ids without events are skipped
    pub async fn build(
        &self,
        entity_type: &str,
        ids: &[String],
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializedDocument>> {
        let def = self.registry.get(entity_type)?.clone();
        let ids = unique(ids);
        let events = self.store.events_for(&def.key, &ids, tx).await?;

        let mut by_id: IndexMap<&str, Vec<&Event>> = ids.iter().map(|id| (id.as_str(), Vec::new())).collect();
        for event in &events {
            if let Some(list) = by_id.get_mut(event.entity_id.as_str()) {
                list.push(event);
            }
        }

        let touched = self.clock.now();
        let mut docs = Vec::with_capacity(by_id.len());
        for (id, history) in by_id {
            let state = fold(&def, history, self.config.record_history);
            let Some(mut doc) = MaterializedDocument::from_fold(id, state, touched, self.config.record_history)
            else {
                continue;
            };
            self.resolve_embeds(&def, &mut doc.values, tx).await?;
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Materialize ids, writing unless the config disables the merge stage
    pub async fn materialize(
        &self,
        entity_type: &str,
        ids: &[String],
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        self.materialize_with(entity_type, ids, self.config.merge_by_default, tx)
            .await
    }

    /// Materialize ids with an explicit merge stage choice
    pub async fn materialize_with(
        &self,
        entity_type: &str,
        ids: &[String],
        merge: bool,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        let started = Instant::now();
        let def = self.registry.get(entity_type)?.clone();
        if !def.persisted {
            return Err(TenancyError::configuration(format!(
                "`{}` has no materialized collection",
                def.name
            )));
        }

        let outcomes = if merge {
            self.db
                .with_transaction(tx, |tx| {
                    let def = def.clone();
                    async move {
                        let docs = self.build(&def.key, ids, Some(&tx)).await?;
                        let outcomes = self.merge_stage(&def, docs, &tx).await?;
                        self.run_hooks(&def.key, &outcomes, &tx).await?;
                        Ok(outcomes)
                    }
                })
                .await?
        } else {
            let docs = self.build(&def.key, ids, tx).await?;
            let mut outcomes = Vec::with_capacity(docs.len());
            for doc in docs {
                let stored = self.stored(&def, &doc.id, tx).await?;
                outcomes.push(MaterializeOutcome {
                    entity_type: def.key.clone(),
                    entity_id: doc.id.clone(),
                    changed_fields: doc.changed_fields(stored.as_ref()),
                    document: doc,
                    written: false,
                });
            }
            outcomes
        };

        info!(
            entity_type = %def.key,
            requested = ids.len(),
            materialized = outcomes.len(),
            written = outcomes.iter().filter(|o| o.written).count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Materialized"
        );
        Ok(outcomes)
    }

    /// Rebuild every id of an entity type
    pub async fn materialize_all(
        &self,
        entity_type: &str,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        let def = self.registry.get(entity_type)?.clone();
        let ids = self.store.entity_ids(&def.key, tx).await?;
        self.materialize(&def.key, &ids, tx).await
    }

    async fn stored(
        &self,
        def: &EntityDefinition,
        id: &str,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Option<MaterializedDocument>> {
        let collection = self.config.materialized_collection(&def.collection);
        self.db
            .find_by_id(&collection, id, tx)
            .await?
            .map(MaterializedDocument::from_document)
            .transpose()
    }

    async fn merge_stage(
        &self,
        def: &EntityDefinition,
        docs: Vec<MaterializedDocument>,
        tx: &Transaction,
    ) -> TenancyResult<Vec<MaterializeOutcome>> {
        let collection = self.config.materialized_collection(&def.collection);
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            let stored = self.stored(def, &doc.id, Some(tx)).await?;
            let changed_fields = doc.changed_fields(stored.as_ref());
            let (document, written) = match stored {
                Some(stored) if doc.same_content(&stored) => (stored, false),
                _ => {
                    self.db
                        .merge_one(&collection, &doc.id, doc.to_document()?, Some(tx))
                        .await?;
                    debug!(
                        collection = %collection,
                        entity_id = %doc.id,
                        changed = ?changed_fields,
                        "Materialized document written"
                    );
                    (doc, true)
                }
            };
            outcomes.push(MaterializeOutcome {
                entity_type: def.key.clone(),
                entity_id: document.id.clone(),
                document,
                changed_fields,
                written,
            });
        }
        Ok(outcomes)
    }

    async fn run_hooks(&self, entity_type: &str, outcomes: &[MaterializeOutcome], tx: &Transaction) -> TenancyResult<()> {
        let written: Vec<MaterializeOutcome> = outcomes.iter().filter(|o| o.written).cloned().collect();
        if written.is_empty() {
            return Ok(());
        }
        for hook in self.hooks_for(entity_type) {
            hook.on_materialize(entity_type, &written, tx)
                .await
                .map_err(TenancyError::into_abort)?;
        }
        Ok(())
    }

    async fn resolve_embeds(
        &self,
        def: &EntityDefinition,
        values: &mut Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> TenancyResult<()> {
        for rel in def.relationships.iter().filter(|r| !r.with.is_empty()) {
            let Some(current) = values.get_mut(&rel.local_field()) else {
                continue;
            };
            let target = self.registry.get(&rel.has)?;
            let collection = self.config.materialized_collection(&target.collection);
            match current {
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        self.resolve_slot(rel, &collection, item, tx).await?;
                    }
                }
                Value::Null => {}
                slot => self.resolve_slot(rel, &collection, slot, tx).await?,
            }
        }
        Ok(())
    }

    async fn resolve_slot(
        &self,
        rel: &Relationship,
        collection: &str,
        slot: &mut Value,
        tx: Option<&Transaction>,
    ) -> TenancyResult<()> {
        let target = match &rel.wrap {
            Some(key) => match slot.as_object_mut().and_then(|element| element.get_mut(key)) {
                Some(inner) => inner,
                None => return Ok(()),
            },
            None => slot,
        };
        let Some(id) = reference_id(target).map(str::to_string) else {
            return Ok(());
        };
        let stored = self.db.find_by_id(collection, &id, tx).await?;
        *target = snapshot(&id, &rel.with.props, &rel.with.edges, stored.as_ref());
        Ok(())
    }
}

/// `{_id, ...props, ...edges}` copied from the target's document
fn snapshot(id: &str, props: &IndexSet<String>, edges: &IndexSet<String>, stored: Option<&Document>) -> Value {
    let mut out = Map::new();
    out.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    if let Some(doc) = stored {
        for field in props.iter().chain(edges) {
            if let Some(value) = doc.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

fn unique(ids: &[String]) -> Vec<String> {
    ids.iter().cloned().collect::<IndexSet<_>>().into_iter().collect()
}
