// Copyright 2025 Cowboy AI, LLC.

//! Transaction sessions over the document database
//!
//! A session buffers its writes per collection and makes them visible to
//! reads issued through the same handle. Commit publishes the buffer in one
//! step under the database write lock; abort (or dropping the last handle of
//! an uncommitted session) discards it. Each staged document remembers the
//! committed version it was based on, and commit fails with a write conflict
//! when another writer got there first. Handles are cheap clones, so a
//! caller that already holds a session passes it down and every nested
//! operation joins it instead of opening its own.

use super::database::Database;
use super::document::Document;
use crate::errors::{TenancyError, TenancyResult};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting reads and writes
    Started,
    /// Writes published (terminal)
    Committed,
    /// Writes discarded (terminal)
    Aborted,
}

impl SessionState {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Started => "Started",
            SessionState::Committed => "Committed",
            SessionState::Aborted => "Aborted",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }

    /// Allowed moves: `Started → Committed` and `Started → Aborted`
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Started, SessionState::Committed)
                | (SessionState::Started, SessionState::Aborted)
        )
    }
}

/// A staged document and the committed version it replaces
#[derive(Debug, Clone)]
pub(crate) struct StagedDoc {
    pub(crate) doc: Document,
    pub(crate) base: u64,
}

/// Writes staged by a session, keyed by collection then `_id`
pub(crate) type Staged = HashMap<String, BTreeMap<String, StagedDoc>>;

struct TxInner {
    id: Uuid,
    db: Database,
    state: Mutex<SessionState>,
    staged: Mutex<Staged>,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let state = *lock(&self.state);
        if state == SessionState::Started {
            let pending: usize = lock(&self.staged).values().map(BTreeMap::len).sum();
            debug!(
                transaction_id = %self.id,
                pending_writes = pending,
                "Session released without commit, discarding staged writes"
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to an open session
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn start(db: Database) -> Self {
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, "Transaction started");
        Self {
            inner: Arc::new(TxInner {
                id,
                db,
                state: Mutex::new(SessionState::Started),
                staged: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// Whether the session still accepts writes
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Started
    }

    /// Whether this handle belongs to `db`
    pub fn belongs_to(&self, db: &Database) -> bool {
        self.inner.db.same_as(db)
    }

    fn transition(&self, target: SessionState) -> TenancyResult<()> {
        let mut state = lock(&self.inner.state);
        if !state.can_transition_to(&target) {
            return Err(TenancyError::Transaction(format!(
                "transaction {} cannot move from {} to {}",
                self.inner.id,
                state.name(),
                target.name()
            )));
        }
        *state = target;
        Ok(())
    }

    /// Publish every staged write
    pub async fn commit(&self) -> TenancyResult<()> {
        if !self.is_active() {
            return Err(TenancyError::Transaction(format!(
                "transaction {} is {}",
                self.inner.id,
                self.state().name()
            )));
        }
        let staged = std::mem::take(&mut *lock(&self.inner.staged));
        let writes: usize = staged.values().map(BTreeMap::len).sum();
        match self.inner.db.publish(staged).await {
            Ok(()) => {
                self.transition(SessionState::Committed)?;
                info!(
                    transaction_id = %self.inner.id,
                    writes = writes,
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Aborted)?;
                warn!(transaction_id = %self.inner.id, error = %e, "Transaction aborted at commit");
                Err(e.into_abort())
            }
        }
    }

    /// Discard every staged write. Aborting a finished session is a no-op.
    pub fn abort(&self) {
        if self.transition(SessionState::Aborted).is_ok() {
            let discarded: usize = lock(&self.inner.staged)
                .drain()
                .map(|(_, docs)| docs.len())
                .sum();
            warn!(
                transaction_id = %self.inner.id,
                discarded_writes = discarded,
                "Transaction aborted"
            );
        }
    }

    pub(crate) fn ensure_active(&self) -> TenancyResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TenancyError::Transaction(format!(
                "transaction {} is {}",
                self.inner.id,
                self.state().name()
            )))
        }
    }

    /// Stage `doc` under `id`. `base` is the committed version the write was
    /// computed from; restaging keeps the version recorded first.
    pub(crate) fn stage(&self, collection: &str, id: String, doc: Document, base: u64) -> TenancyResult<()> {
        self.ensure_active()?;
        let mut staged = lock(&self.inner.staged);
        match staged.entry(collection.to_string()).or_default().entry(id) {
            Entry::Occupied(mut entry) => entry.get_mut().doc = doc,
            Entry::Vacant(entry) => {
                entry.insert(StagedDoc { doc, base });
            }
        }
        Ok(())
    }

    pub(crate) fn staged(&self, collection: &str) -> BTreeMap<String, Document> {
        lock(&self.inner.staged)
            .get(collection)
            .map(|docs| docs.iter().map(|(id, s)| (id.clone(), s.doc.clone())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn staged_one(&self, collection: &str, id: &str) -> Option<Document> {
        lock(&self.inner.staged)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|s| s.doc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Started.is_terminal());
    }

    #[test]
    fn test_can_transition_to() {
        use SessionState as S;
        assert!(S::Started.can_transition_to(&S::Committed));
        assert!(S::Started.can_transition_to(&S::Aborted));
        assert!(!S::Committed.can_transition_to(&S::Aborted));
        assert!(!S::Aborted.can_transition_to(&S::Committed));
        assert!(!S::Committed.can_transition_to(&S::Started));
    }

    #[tokio::test]
    async fn test_commit_twice_fails() {
        let db = Database::new();
        let tx = db.start_transaction();
        tx.commit().await.unwrap();
        assert_eq!(tx.state(), SessionState::Committed);
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, TenancyError::Transaction(_)));
    }

    #[tokio::test]
    async fn test_abort_after_commit_is_noop() {
        let db = Database::new();
        let tx = db.start_transaction();
        tx.commit().await.unwrap();
        tx.abort();
        assert_eq!(tx.state(), SessionState::Committed);
    }

    #[tokio::test]
    async fn test_stage_after_abort_fails() {
        let db = Database::new();
        let tx = db.start_transaction();
        tx.abort();
        let err = tx.stage("users", "u1".into(), Document::new(), 0).unwrap_err();
        assert!(matches!(err, TenancyError::Transaction(_)));
    }

    #[test]
    fn test_restage_keeps_first_base() {
        let db = Database::new();
        let tx = db.start_transaction();
        let mut doc = Document::new();
        tx.stage("users", "u1".into(), doc.clone(), 3).unwrap();
        doc.insert("name".into(), "Jane".into());
        tx.stage("users", "u1".into(), doc.clone(), 7).unwrap();

        let staged = lock(&tx.inner.staged);
        let entry = &staged["users"]["u1"];
        assert_eq!(entry.base, 3);
        assert_eq!(entry.doc, doc);
    }
}
