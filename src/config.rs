// Copyright 2025 Cowboy AI, LLC.

//! Store configuration and the clock used for event and metadata dates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration shared by the event store, materializer and repos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Suffix of per-entity-type event collections (`user-events`)
    pub event_collection_suffix: String,

    /// Prefix for materialized collections (empty = plain plural name)
    pub materialized_prefix: String,

    /// Record a `_meta.history` entry per folded event
    pub record_history: bool,

    /// Whether `materialize` writes by default
    pub merge_by_default: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_collection_suffix: "events".to_string(),
            materialized_prefix: String::new(),
            record_history: false,
            merge_by_default: true,
        }
    }
}

impl StoreConfig {
    /// Build a config from `CIM_TENANCY_*` environment variables, falling
    /// back to defaults for anything unset
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(suffix) = lookup("CIM_TENANCY_EVENT_SUFFIX").filter(|s| !s.trim().is_empty()) {
            config.event_collection_suffix = suffix.trim().to_string();
        }
        if let Some(prefix) = lookup("CIM_TENANCY_MATERIALIZED_PREFIX") {
            config.materialized_prefix = prefix.trim().to_string();
        }
        if let Some(flag) = lookup("CIM_TENANCY_RECORD_HISTORY") {
            config.record_history = matches!(flag.trim(), "1" | "true" | "yes");
        }
        config
    }

    /// Name of the event collection for an entity type
    pub fn event_collection(&self, entity_type: &str) -> String {
        format!("{entity_type}-{}", self.event_collection_suffix)
    }

    /// Name of the materialized collection for a definition's collection name
    pub fn materialized_collection(&self, collection: &str) -> String {
        if self.materialized_prefix.is_empty() {
            collection.to_string()
        } else {
            format!("{}{collection}", self.materialized_prefix)
        }
    }
}

/// Source of "now"
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(std::sync::Mutex::new(now)),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // a poisoned clock still holds a valid instant
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.event_collection("user"), "user-events");
        assert_eq!(config.materialized_collection("users"), "users");
        assert!(!config.record_history);
        assert!(config.merge_by_default);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CIM_TENANCY_EVENT_SUFFIX", "log"),
            ("CIM_TENANCY_MATERIALIZED_PREFIX", "mat."),
            ("CIM_TENANCY_RECORD_HISTORY", "true"),
        ]
        .into_iter()
        .collect();
        let config = StoreConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.event_collection("organization"), "organization-log");
        assert_eq!(config.materialized_collection("organizations"), "mat.organizations");
        assert!(config.record_history);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(5));
    }
}
