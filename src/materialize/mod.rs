// Copyright 2025 Cowboy AI, LLC.

//! Materialization: event histories folded into current-state documents
//!
//! Materialized documents are a derived cache. They can be discarded and
//! rebuilt from the event log at any time.

mod document;
mod engine;
mod fold;

pub use document::{MaterializedDocument, Meta, DELETED_PATH, META_FIELD};
pub use engine::{MaterializeOutcome, Materializer};
pub use fold::{fold, FoldState, HistoryEntry};
