// Copyright 2025 Cowboy AI, LLC.

//! Error types for tenancy persistence operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single failed field inside a validated payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field (`values.email`)
    pub path: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    /// Create a new field error
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.path, self.message)
    }
}

/// Errors that can occur in tenancy persistence operations
#[derive(Debug, Clone, Error)]
pub enum TenancyError {
    /// Payload failed its schema
    #[error("Validation error: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// Uniqueness violation on append
    #[error("Conflict: {entity_type} {entity_id} violates unique index `{index}`")]
    Conflict {
        /// Entity type whose log rejected the event
        entity_type: String,
        /// Entity id that collided
        entity_id: String,
        /// Name of the violated index
        index: String,
    },

    /// Strict lookup on a missing id
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity that wasn't found
        entity_type: String,
        /// ID that was searched for
        id: String,
    },

    /// A multi-collection write was aborted
    #[error("Transaction aborted: {0}")]
    Transaction(String),

    /// Model built out of order or with duplicate names
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for tenancy persistence operations
pub type TenancyResult<T> = Result<T, TenancyError>;

impl From<serde_json::Error> for TenancyError {
    fn from(err: serde_json::Error) -> Self {
        TenancyError::Serialization(err.to_string())
    }
}

impl TenancyError {
    /// Shorthand for a validation error on one field
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        TenancyError::Validation(vec![FieldError::new(path, message)])
    }

    /// Shorthand for a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        TenancyError::Configuration(msg.into())
    }

    /// Check if this is a uniqueness conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, TenancyError::Conflict { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, TenancyError::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, TenancyError::Validation(_))
    }

    /// Whether a caller may retry the operation unchanged.
    ///
    /// Validation and configuration failures are deterministic and never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TenancyError::Transaction(_) | TenancyError::Storage(_))
    }

    /// Wrap any error as a transaction abort, keeping aborts as they are
    pub fn into_abort(self) -> Self {
        match self {
            TenancyError::Transaction(_) => self,
            other => TenancyError::Transaction(other.to_string()),
        }
    }
}
