// Copyright 2025 Cowboy AI, LLC.

//! # CIM Tenancy
//!
//! Event-sourced persistence core for multi-tenant identity.
//!
//! Every change to an entity is an immutable event in a per-type log. The
//! current state of an entity is a fold of its events, materialized into a
//! document that also carries denormalized copies of related entities.
//! When an entity changes, those copies are updated in the same
//! transaction.
//!
//! - **Model**: entities, verbs and relationships described once, validated
//!   together in a [`ModelRegistry`]
//! - **Event Store**: append-only logs with a uniqueness guarantee on
//!   creation
//! - **Commands**: validated appends, including create-or-restore
//! - **Materialization**: fold, resolve embeds, write only what changed
//! - **Cascade**: push changed fields into every embedding document
//! - **Repos**: one call per command, everything in one transaction
//!
//! ## Example
//!
//! ```no_run
//! use cim_tenancy::{domain, CommandPayload, Repos, TenancyResult};
//!
//! # async fn run() -> TenancyResult<()> {
//! let repos = Repos::builder(domain::tenancy_registry()?).build()?;
//! domain::create_indexes(&repos).await?;
//!
//! let orgs = repos.repo("organization")?;
//! orgs.create(CommandPayload::new("o1").value("name", "Acme"), None).await?;
//! domain::update_name(&orgs, "o1", "Acme Corp", None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cascade;
pub mod command;
pub mod config;
pub mod domain;
mod errors;
pub mod event;
pub mod event_store;
pub mod materialize;
pub mod model;
pub mod naming;
pub mod repo;
pub mod store;

pub use cascade::{CascadePropagator, CascadeReport, CascadeStep, EmbedPath, MaterializeHook};
pub use command::{CommandHandler, CommandPayload, OneOrMany};
pub use config::{Clock, FixedClock, SharedClock, StoreConfig, SystemClock};
pub use errors::{FieldError, TenancyError, TenancyResult};
pub use event::{Event, EventInput, Verb};
pub use event_store::{AppendOutcome, DocumentEventStore, EventStore, CREATE_INDEX};
pub use materialize::{MaterializeOutcome, MaterializedDocument, Materializer, Meta};
pub use model::{
    Cardinality, EmbedSpec, EntityBuilder, EntityDefinition, ModelRegistry, Prop, PropType, Relationship,
    RelationshipBuilder,
};
pub use repo::{CommandResult, EntityRepo, Repos, ReposBuilder};
pub use store::{Database, Filter, Transaction};
