// Copyright 2025 Cowboy AI, LLC.

//! Propagation of changed fields into denormalized copies
//!
//! The plan is derived from the registry once. For every target type it
//! lists the direct embeds of that type and the edge embeds that reach it
//! through one intermediate type. On materialization only the embedded
//! props that actually changed are pushed, with one `update_many` per
//! plan step, inside the caller's transaction. Propagation is
//! one hop: updated copies do not trigger further cascades.

use crate::config::StoreConfig;
use crate::errors::{TenancyError, TenancyResult};
use crate::materialize::MaterializeOutcome;
use crate::model::{ModelRegistry, Relationship};
use crate::store::{Database, FieldUpdate, Filter, Transaction, ID_FIELD};
use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Called after documents of an entity type are materialized, inside the
/// materialization transaction
#[async_trait]
pub trait MaterializeHook: Send + Sync + fmt::Debug {
    /// React to the outcomes that were written
    async fn on_materialize(
        &self,
        entity_type: &str,
        outcomes: &[MaterializeOutcome],
        tx: &Transaction,
    ) -> TenancyResult<()>;
}

/// One side of an embed: where the snapshot lives relative to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedPath {
    /// Field on the owner
    pub field: String,
    /// Whether the field is a list
    pub many: bool,
    /// Key of the snapshot inside each element
    pub wrap: Option<String>,
}

impl EmbedPath {
    fn from_relationship(rel: &Relationship) -> Self {
        Self {
            field: rel.local_field(),
            many: rel.is_many(),
            wrap: rel.wrap.clone(),
        }
    }

    /// `wrap.` or empty
    fn prefix(&self) -> String {
        self.wrap.as_ref().map(|w| format!("{w}.")).unwrap_or_default()
    }

    /// Path to the snapshot id, traversing arrays implicitly
    fn id_path(&self) -> String {
        format!("{}.{}{ID_FIELD}", self.field, self.prefix())
    }

    /// Path to the snapshot with a positional segment when the field is a list
    fn positional(&self, ident: &str) -> String {
        if self.many {
            format!("{}.$[{ident}].{}", self.field, self.prefix())
        } else {
            format!("{}.{}", self.field, self.prefix())
        }
    }

    /// Filter on an element (or the field) selecting the snapshot with `id`
    fn element_filter(&self, filter: impl Fn(String) -> Filter) -> Filter {
        filter(format!("{}{ID_FIELD}", self.prefix()))
    }
}

/// A dependent collection holding copies of a target's fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeStep {
    /// `owner.field[.wrap]` embeds the target
    Direct {
        /// Owner entity name
        owner: String,
        /// Owner collection
        collection: String,
        /// Embed location
        path: EmbedPath,
        /// Copied props of the target
        props: Vec<String>,
    },
    /// `owner.field[.wrap].edge[.wrap]` embeds the target through an
    /// intermediate entity
    Edge {
        /// Owner entity name
        owner: String,
        /// Owner collection
        collection: String,
        /// Where the owner embeds the intermediate
        outer: EmbedPath,
        /// Intermediate collection
        via_collection: String,
        /// Where the intermediate embeds the target
        inner: EmbedPath,
        /// Copied props of the target
        props: Vec<String>,
    },
}

impl CascadeStep {
    fn props(&self) -> &[String] {
        match self {
            CascadeStep::Direct { props, .. } | CascadeStep::Edge { props, .. } => props,
        }
    }

    fn collection(&self) -> &str {
        match self {
            CascadeStep::Direct { collection, .. } | CascadeStep::Edge { collection, .. } => collection,
        }
    }
}

/// Counts from one propagation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Collection updates issued
    pub updates: usize,
    /// Documents matched
    pub matched: usize,
    /// Documents modified
    pub modified: usize,
}

/// Hook that keeps embedded copies in sync
#[derive(Debug, Clone)]
pub struct CascadePropagator {
    db: Database,
    plans: HashMap<String, Vec<CascadeStep>>,
}

impl CascadePropagator {
    /// Derive the cascade plan of every entity type in the registry
    pub fn from_registry(registry: &ModelRegistry, db: Database, config: &StoreConfig) -> Self {
        let mut plans: HashMap<String, Vec<CascadeStep>> = HashMap::new();

        for target in registry.entities() {
            let mut steps = Vec::new();
            for (owner, rel) in registry.embeds_of(&target.name) {
                if !owner.persisted || rel.with.props.is_empty() {
                    continue;
                }
                steps.push(CascadeStep::Direct {
                    owner: owner.name.clone(),
                    collection: config.materialized_collection(&owner.collection),
                    path: EmbedPath::from_relationship(rel),
                    props: rel.with.props.iter().cloned().collect(),
                });
            }

            for (via, inner_rel) in registry.embeds_of(&target.name) {
                let edge = inner_rel.local_field();
                for (owner, outer_rel) in registry.embeds_of(&via.name) {
                    if !owner.persisted || !outer_rel.with.edges.contains(&edge) || inner_rel.with.props.is_empty() {
                        continue;
                    }
                    steps.push(CascadeStep::Edge {
                        owner: owner.name.clone(),
                        collection: config.materialized_collection(&owner.collection),
                        outer: EmbedPath::from_relationship(outer_rel),
                        via_collection: config.materialized_collection(&via.collection),
                        inner: EmbedPath::from_relationship(inner_rel),
                        props: inner_rel.with.props.iter().cloned().collect(),
                    });
                }
            }

            if !steps.is_empty() {
                plans.insert(target.key.clone(), steps);
            }
        }

        Self { db, plans }
    }

    /// Steps run when `entity_type` changes
    pub fn plan_for(&self, entity_type: &str) -> &[CascadeStep] {
        self.plans.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }

    /// Push changed props of every written outcome into their copies
    pub async fn propagate(
        &self,
        entity_type: &str,
        outcomes: &[MaterializeOutcome],
        tx: &Transaction,
    ) -> TenancyResult<CascadeReport> {
        let mut report = CascadeReport::default();
        let mut by_collection: IndexMap<&str, Vec<&CascadeStep>> = IndexMap::new();
        for step in self.plan_for(entity_type) {
            by_collection.entry(step.collection()).or_default().push(step);
        }

        for outcome in outcomes.iter().filter(|o| o.written) {
            // steps sharing a collection run in order, collections concurrently
            let groups = by_collection.values().map(|steps| async move {
                let mut results = Vec::with_capacity(steps.len());
                for step in steps {
                    results.extend(self.run_step(step, outcome, tx).await?);
                }
                Ok::<_, TenancyError>(results)
            });
            for result in try_join_all(groups).await?.into_iter().flatten() {
                report.updates += 1;
                report.matched += result.0;
                report.modified += result.1;
            }
        }
        if report.updates > 0 {
            info!(
                entity_type = %entity_type,
                updates = report.updates,
                matched = report.matched,
                modified = report.modified,
                "Cascade propagated"
            );
        }
        Ok(report)
    }

    async fn run_step(
        &self,
        step: &CascadeStep,
        outcome: &MaterializeOutcome,
        tx: &Transaction,
    ) -> TenancyResult<Option<(usize, usize)>> {
        let changed: Vec<&String> = step
            .props()
            .iter()
            .filter(|p| outcome.changed_fields.contains(*p))
            .collect();
        if changed.is_empty() {
            return Ok(None);
        }
        let id = outcome.entity_id.as_str();
        let value_of = |prop: &str| outcome.document.values.get(prop).cloned().unwrap_or(Value::Null);

        let (filter, update) = match step {
            CascadeStep::Direct { path, .. } => {
                let mut update = FieldUpdate::new();
                for prop in &changed {
                    update = update.set(format!("{}{prop}", path.positional("el")), value_of(prop));
                }
                if path.many {
                    update = update.array_filter("el", path.element_filter(|p| Filter::eq(p, id)));
                }
                (Filter::eq(path.id_path(), id), update)
            }
            CascadeStep::Edge {
                outer,
                via_collection,
                inner,
                ..
            } => {
                let dependents = self
                    .db
                    .distinct(via_collection, ID_FIELD, &Filter::eq(inner.id_path(), id), Some(tx))
                    .await?;
                if dependents.is_empty() {
                    return Ok(None);
                }
                let base = format!("{}{}", outer.positional("a"), inner.positional("b"));
                let mut update = FieldUpdate::new();
                for prop in &changed {
                    update = update.set(format!("{base}{prop}"), value_of(prop));
                }
                if outer.many {
                    let ids = dependents.clone();
                    update = update.array_filter("a", outer.element_filter(move |p| Filter::any_of(p, ids.clone())));
                }
                if inner.many {
                    update = update.array_filter("b", inner.element_filter(|p| Filter::eq(p, id)));
                }
                (Filter::any_of(outer.id_path(), dependents), update)
            }
        };

        let result = self.db.update_many(step.collection(), &filter, &update, Some(tx)).await?;
        debug!(
            collection = %step.collection(),
            entity_id = %id,
            matched = result.matched,
            modified = result.modified,
            "Cascade update applied"
        );
        Ok(Some((result.matched, result.modified)))
    }
}

#[async_trait]
impl MaterializeHook for CascadePropagator {
    async fn on_materialize(
        &self,
        entity_type: &str,
        outcomes: &[MaterializeOutcome],
        tx: &Transaction,
    ) -> TenancyResult<()> {
        self.propagate(entity_type, outcomes, tx).await.map(|_| ())
    }
}
