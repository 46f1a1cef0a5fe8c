// Copyright 2025 Cowboy AI, LLC.

//! Document database primitives
//!
//! Everything the event log, the materializer and the cascade need from a
//! document store: collections keyed by `_id`, declared unique indexes,
//! filtered reads, merge-upserts, multi-document updates with array filters,
//! and transaction sessions.

mod database;
mod document;
mod filter;
mod transaction;
mod update;

pub use database::{Database, IndexSpec, InsertOutcome, UpdateResult};
pub use document::{document_id, get_path, reference_id, resolve, resolve_in, set_path, Document, ID_FIELD};
pub use filter::Filter;
pub use transaction::{SessionState, Transaction};
pub use update::{ArrayFilter, FieldUpdate};
