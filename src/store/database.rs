// Copyright 2025 Cowboy AI, LLC.

//! In-memory document database
//!
//! Collections of JSON documents keyed by `_id`, with declared (optionally
//! partial) unique indexes, filtered reads, `distinct`, merge-upserts and
//! multi-document field updates. Every operation takes an optional
//! [`Transaction`]; with one, writes are staged in the session and reads see
//! them, without one they apply immediately.
//!
//! Every committed write bumps a per-document version. A session whose
//! staged document was overwritten by someone else fails at commit.

use super::document::{document_id, get_path, resolve_in, Document, ID_FIELD};
use super::filter::Filter;
use super::transaction::{Staged, Transaction};
use super::update::FieldUpdate;
use crate::errors::{TenancyError, TenancyResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Declared index on a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique per collection
    pub name: String,
    /// Dotted key paths
    pub keys: Vec<String>,
    /// Reject a second document with the same key
    pub unique: bool,
    /// Only documents matching this filter participate
    pub partial: Option<Filter>,
}

impl IndexSpec {
    /// A unique index over `keys`
    pub fn unique(name: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            unique: true,
            partial: None,
        }
    }

    /// Restrict the index to documents matching `filter`
    pub fn partial(mut self, filter: Filter) -> Self {
        self.partial = Some(filter);
        self
    }

    fn covers(&self, doc: &Document) -> bool {
        self.partial.as_ref().map_or(true, |f| f.matches(doc))
    }

    fn key_of(&self, doc: &Document) -> Vec<Value> {
        let value = Value::Object(doc.clone());
        self.keys
            .iter()
            .map(|k| get_path(&value, k).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Name of this index if `candidate` collides with any of `existing`
    fn violated_by<'a>(&self, candidate: &Document, mut existing: impl Iterator<Item = &'a Document>) -> bool {
        if !self.unique || !self.covers(candidate) {
            return false;
        }
        let key = self.key_of(candidate);
        let candidate_id = document_id(candidate);
        existing.any(|doc| document_id(doc) != candidate_id && self.covers(doc) && self.key_of(doc) == key)
    }
}

/// Result of an insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was written (or staged)
    Inserted,
    /// A unique index rejected the document
    DuplicateKey {
        /// Name of the violated index
        index: String,
    },
}

/// Result of a multi-document update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents matched by the filter
    pub matched: usize,
    /// Documents actually changed
    pub modified: usize,
}

/// Committed documents of one collection with a write counter per `_id`
#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    versions: HashMap<String, u64>,
}

impl Collection {
    /// Committed version of `id`; 0 when it was never written
    fn version(&self, id: &str) -> u64 {
        self.versions.get(id).copied().unwrap_or(0)
    }

    fn put(&mut self, id: String, doc: Document) {
        *self.versions.entry(id.clone()).or_default() += 1;
        self.docs.insert(id, doc);
    }
}

type Collections = HashMap<String, Collection>;

/// A matching document with the committed version it was read at
type Selected = (String, Document, u64);

#[derive(Debug, Default)]
struct DbInner {
    collections: RwLock<Collections>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
    sequence: AtomicU64,
    #[cfg(any(test, feature = "test-utils"))]
    faults: std::sync::Mutex<std::collections::HashSet<String>>,
}

/// Shared handle to an in-memory database
#[derive(Debug, Clone, Default)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn same_as(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Next value of the database-wide insertion counter (starts at 1)
    pub fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Open a session
    pub fn start_transaction(&self) -> Transaction {
        Transaction::start(self.clone())
    }

    /// Run `work` inside a session.
    ///
    /// When `existing` is given the work joins it and the caller stays in
    /// charge of commit/abort. Otherwise a session is opened, committed when
    /// `work` succeeds and aborted when it fails; the error is returned
    /// unchanged. The session is released on every path.
    pub async fn with_transaction<T, F, Fut>(&self, existing: Option<&Transaction>, work: F) -> TenancyResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        if let Some(tx) = existing {
            if !tx.belongs_to(self) {
                return Err(TenancyError::Transaction(
                    "transaction belongs to a different database".to_string(),
                ));
            }
            tx.ensure_active()?;
            return work(tx.clone()).await;
        }

        let tx = self.start_transaction();
        match work(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    /// Declare an index; re-declaring the same name is a no-op
    pub async fn create_index(&self, collection: &str, spec: IndexSpec) {
        let mut indexes = self.inner.indexes.write().await;
        let list = indexes.entry(collection.to_string()).or_default();
        if !list.iter().any(|i| i.name == spec.name) {
            debug!(collection = %collection, index = %spec.name, "Index created");
            list.push(spec);
        }
    }

    /// Indexes declared on a collection
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.inner
            .indexes
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of every collection holding at least one document
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail every write to `collection` with a storage error
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_writes_to(&self, collection: &str) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection.to_string());
    }

    /// Stop failing writes to `collection`
    #[cfg(any(test, feature = "test-utils"))]
    pub fn clear_fault(&self, collection: &str) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(collection);
    }

    #[cfg(any(test, feature = "test-utils"))]
    fn check_fault(&self, collection: &str) -> TenancyResult<()> {
        let faults = self.inner.faults.lock().unwrap_or_else(|e| e.into_inner());
        if faults.contains(collection) {
            return Err(TenancyError::Storage(format!("injected write failure on `{collection}`")));
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "test-utils")))]
    fn check_fault(&self, _collection: &str) -> TenancyResult<()> {
        Ok(())
    }

    /// Documents matching `filter` as seen through `tx`, ordered by `_id`.
    ///
    /// Staged writes shadow committed documents. Only matches are cloned,
    /// each with the committed version of its `_id`.
    async fn select(&self, collection: &str, filter: &Filter, tx: Option<&Transaction>) -> Vec<Selected> {
        let staged = tx.map(|t| t.staged(collection)).unwrap_or_default();
        let collections = self.inner.collections.read().await;
        let committed = collections.get(collection);
        let version = |id: &str| committed.map_or(0, |c| c.version(id));

        let mut matches: Vec<(&String, &Document)> = committed
            .into_iter()
            .flat_map(|c| c.docs.iter())
            .filter(|(id, _)| !staged.contains_key(*id))
            .chain(staged.iter())
            .filter(|(_, doc)| filter.matches(doc))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));
        matches
            .into_iter()
            .map(|(id, doc)| (id.clone(), doc.clone(), version(id)))
            .collect()
    }

    /// Document with the given `_id` as seen through `tx`, and its committed version
    async fn current(&self, collection: &str, id: &str, tx: Option<&Transaction>) -> (Option<Document>, u64) {
        let collections = self.inner.collections.read().await;
        let committed = collections.get(collection);
        let version = committed.map_or(0, |c| c.version(id));
        if let Some(staged) = tx.and_then(|t| t.staged_one(collection, id)) {
            return (Some(staged), version);
        }
        (committed.and_then(|c| c.docs.get(id)).cloned(), version)
    }

    /// Insert a new document; it must carry a string `_id`
    pub async fn insert_one(
        &self,
        collection: &str,
        doc: Document,
        tx: Option<&Transaction>,
    ) -> TenancyResult<InsertOutcome> {
        self.check_fault(collection)?;
        let id = document_id(&doc)
            .ok_or_else(|| TenancyError::invalid(ID_FIELD, "must be a non-empty string"))?
            .to_string();
        let indexes = self.indexes(collection).await;

        match tx {
            Some(tx) => {
                tx.ensure_active()?;
                let staged = tx.staged(collection);
                let base = {
                    let collections = self.inner.collections.read().await;
                    let committed = collections.get(collection);
                    let exists = staged.contains_key(&id) || committed.is_some_and(|c| c.docs.contains_key(&id));
                    let existing: Vec<&Document> = committed
                        .into_iter()
                        .flat_map(|c| c.docs.iter())
                        .filter(|(other, _)| !staged.contains_key(*other))
                        .map(|(_, d)| d)
                        .chain(staged.values())
                        .collect();
                    if let Some(outcome) = duplicate(&indexes, exists, &doc, &existing) {
                        return Ok(outcome);
                    }
                    committed.map_or(0, |c| c.version(&id))
                };
                tx.stage(collection, id, doc, base)?;
            }
            None => {
                let mut collections = self.inner.collections.write().await;
                let docs = collections.entry(collection.to_string()).or_default();
                let existing: Vec<&Document> = docs.docs.values().collect();
                if let Some(outcome) = duplicate(&indexes, docs.docs.contains_key(&id), &doc, &existing) {
                    return Ok(outcome);
                }
                docs.put(id, doc);
            }
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Documents matching `filter`, ordered by `_id`
    pub async fn find(&self, collection: &str, filter: &Filter, tx: Option<&Transaction>) -> TenancyResult<Vec<Document>> {
        Ok(self
            .select(collection, filter, tx)
            .await
            .into_iter()
            .map(|(_, doc, _)| doc)
            .collect())
    }

    /// First document matching `filter`
    pub async fn find_one(&self, collection: &str, filter: &Filter, tx: Option<&Transaction>) -> TenancyResult<Option<Document>> {
        Ok(self.find(collection, filter, tx).await?.into_iter().next())
    }

    /// Document with the given `_id`
    pub async fn find_by_id(&self, collection: &str, id: &str, tx: Option<&Transaction>) -> TenancyResult<Option<Document>> {
        Ok(self.current(collection, id, tx).await.0)
    }

    /// Number of documents matching `filter`
    pub async fn count(&self, collection: &str, filter: &Filter, tx: Option<&Transaction>) -> TenancyResult<usize> {
        Ok(self.select(collection, filter, tx).await.len())
    }

    /// Distinct values at `path` over documents matching `filter`, in first-seen order
    pub async fn distinct(
        &self,
        collection: &str,
        path: &str,
        filter: &Filter,
        tx: Option<&Transaction>,
    ) -> TenancyResult<Vec<Value>> {
        let mut seen = Vec::new();
        for doc in self.find(collection, filter, tx).await? {
            for value in resolve_in(&doc, path) {
                if !value.is_array() && !seen.contains(value) {
                    seen.push(value.clone());
                }
            }
        }
        Ok(seen)
    }

    /// Upsert `doc` under `id`, merging its top-level keys into any existing
    /// document. Returns whether the stored document changed.
    pub async fn merge_one(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
        tx: Option<&Transaction>,
    ) -> TenancyResult<bool> {
        self.check_fault(collection)?;
        let (current, base) = self.current(collection, id, tx).await;
        let mut merged = current.unwrap_or_default();
        let before = merged.clone();
        merged.extend(doc);
        merged.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        if merged == before {
            return Ok(false);
        }
        match tx {
            Some(tx) => tx.stage(collection, id.to_string(), merged, base)?,
            None => self
                .inner
                .collections
                .write()
                .await
                .entry(collection.to_string())
                .or_default()
                .put(id.to_string(), merged),
        }
        Ok(true)
    }

    /// Apply `update` to every document matching `filter`
    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &FieldUpdate,
        tx: Option<&Transaction>,
    ) -> TenancyResult<UpdateResult> {
        self.check_fault(collection)?;
        let mut result = UpdateResult::default();
        if update.is_empty() {
            return Ok(result);
        }

        match tx {
            Some(tx) => {
                for (id, mut doc, base) in self.select(collection, filter, Some(tx)).await {
                    result.matched += 1;
                    if update.apply(&mut doc) {
                        result.modified += 1;
                        tx.stage(collection, id, doc, base)?;
                    }
                }
            }
            None => {
                let mut collections = self.inner.collections.write().await;
                if let Some(docs) = collections.get_mut(collection) {
                    for (id, doc) in docs.docs.iter_mut().filter(|(_, d)| filter.matches(d)) {
                        result.matched += 1;
                        if update.apply(doc) {
                            result.modified += 1;
                            *docs.versions.entry(id.clone()).or_default() += 1;
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// Publish a session's staged writes.
    ///
    /// Fails without writing anything when a staged document was committed
    /// by someone else since it was staged, or when a unique index is
    /// violated by what was committed in the meantime.
    pub(crate) async fn publish(&self, staged: Staged) -> TenancyResult<()> {
        let indexes = self.inner.indexes.read().await.clone();
        let mut collections = self.inner.collections.write().await;

        for (name, docs) in &staged {
            let base = collections.get(name);
            let current = |id: &str| base.map_or(0, |c| c.version(id));
            if let Some((id, _)) = docs.iter().find(|(id, s)| current(id) != s.base) {
                return Err(TenancyError::Transaction(format!(
                    "write conflict on `{id}` in `{name}`"
                )));
            }

            let Some(specs) = indexes.get(name) else { continue };
            let others: Vec<&Document> = base
                .into_iter()
                .flat_map(|b| b.docs.iter())
                .filter(|(id, _)| !docs.contains_key(*id))
                .map(|(_, d)| d)
                .collect();
            for staged_doc in docs.values() {
                if let Some(spec) = specs.iter().find(|s| s.violated_by(&staged_doc.doc, others.iter().copied())) {
                    return Err(TenancyError::Transaction(format!(
                        "duplicate key on index `{}` in `{name}`",
                        spec.name
                    )));
                }
            }
        }

        for (name, docs) in staged {
            let collection = collections.entry(name).or_default();
            for (id, staged_doc) in docs {
                collection.put(id, staged_doc.doc);
            }
        }
        Ok(())
    }
}

fn duplicate(indexes: &[IndexSpec], exists: bool, doc: &Document, existing: &[&Document]) -> Option<InsertOutcome> {
    if exists {
        return Some(InsertOutcome::DuplicateKey {
            index: ID_FIELD.to_string(),
        });
    }
    indexes
        .iter()
        .find(|spec| spec.violated_by(doc, existing.iter().copied()))
        .map(|spec| InsertOutcome::DuplicateKey {
            index: spec.name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionState;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = Database::new();
        db.insert_one("orgs", doc(json!({ "_id": "o1", "name": "Acme" })), None)
            .await
            .unwrap();
        let found = db.find_by_id("orgs", "o1", None).await.unwrap().unwrap();
        assert_eq!(found["name"], json!("Acme"));
        assert_eq!(db.count("orgs", &Filter::All, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_unique_index() {
        let db = Database::new();
        db.create_index(
            "events",
            IndexSpec::unique("entity_create", &["entityId"]).partial(Filter::eq("command", "CREATE")),
        )
        .await;
        let create = |id: &str| doc(json!({ "_id": id, "entityId": "m1", "command": "CREATE" }));

        assert_eq!(db.insert_one("events", create("e1"), None).await.unwrap(), InsertOutcome::Inserted);
        let update = doc(json!({ "_id": "e2", "entityId": "m1", "command": "UPDATE" }));
        assert_eq!(db.insert_one("events", update, None).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            db.insert_one("events", create("e3"), None).await.unwrap(),
            InsertOutcome::DuplicateKey {
                index: "entity_create".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_transaction_isolates_until_commit() {
        let db = Database::new();
        let tx = db.start_transaction();
        db.merge_one("orgs", "o1", doc(json!({ "name": "Acme" })), Some(&tx))
            .await
            .unwrap();

        assert!(db.find_by_id("orgs", "o1", Some(&tx)).await.unwrap().is_some());
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let db = Database::new();
        let tx = db.start_transaction();
        db.merge_one("orgs", "o1", doc(json!({ "name": "Acme" })), Some(&tx))
            .await
            .unwrap();
        tx.abort();
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_transaction_aborts_on_error() {
        let db = Database::new();
        let result: TenancyResult<()> = db
            .with_transaction(None, |tx| {
                let db = db.clone();
                async move {
                    db.merge_one("orgs", "o1", doc(json!({ "name": "Acme" })), Some(&tx)).await?;
                    Err(TenancyError::Storage("boom".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(TenancyError::Storage(_))));
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_transaction_joins_existing() {
        let db = Database::new();
        let outer = db.start_transaction();
        db.with_transaction(Some(&outer), |tx| {
            let db = db.clone();
            async move { db.merge_one("orgs", "o1", doc(json!({ "name": "Acme" })), Some(&tx)).await }
        })
        .await
        .unwrap();

        // joined work is not committed by the inner call
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_none());
        outer.commit().await.unwrap();
        assert!(db.find_by_id("orgs", "o1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_rechecks_unique_index() {
        let db = Database::new();
        db.create_index("events", IndexSpec::unique("entity", &["entityId"])).await;
        let tx = db.start_transaction();
        db.insert_one("events", doc(json!({ "_id": "e1", "entityId": "x" })), Some(&tx))
            .await
            .unwrap();
        db.insert_one("events", doc(json!({ "_id": "e2", "entityId": "x" })), None)
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, TenancyError::Transaction(_)));
        assert_eq!(db.count("events", &Filter::All, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_fails_when_a_staged_document_changed() {
        let db = Database::new();
        db.merge_one("users", "u1", doc(json!({ "org": "Acme" })), None)
            .await
            .unwrap();

        let tx = db.start_transaction();
        db.merge_one("users", "u1", doc(json!({ "role": "Owner" })), Some(&tx))
            .await
            .unwrap();
        db.update_many(
            "users",
            &Filter::All,
            &FieldUpdate::new().set("org", json!("Acme Corp")),
            None,
        )
        .await
        .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, TenancyError::Transaction(_)));
        assert!(err.is_retryable());
        let stored = db.find_by_id("users", "u1", None).await.unwrap().unwrap();
        assert_eq!(stored, doc(json!({ "_id": "u1", "org": "Acme Corp" })));
    }

    #[tokio::test]
    async fn test_interleaved_transactions_first_commit_wins() {
        let db = Database::new();
        let first = db.start_transaction();
        let second = db.start_transaction();
        db.merge_one("orgs", "o1", doc(json!({ "name": "One" })), Some(&first))
            .await
            .unwrap();
        db.merge_one("orgs", "o1", doc(json!({ "name": "Two" })), Some(&second))
            .await
            .unwrap();
        db.merge_one("orgs", "o2", doc(json!({ "name": "Other" })), Some(&second))
            .await
            .unwrap();

        first.commit().await.unwrap();
        assert!(second.commit().await.is_err());
        assert_eq!(second.state(), SessionState::Aborted);

        let orgs = db.find("orgs", &Filter::All, None).await.unwrap();
        assert_eq!(orgs, vec![doc(json!({ "_id": "o1", "name": "One" }))]);
    }

    #[tokio::test]
    async fn test_writes_to_other_documents_do_not_conflict() {
        let db = Database::new();
        db.merge_one("users", "u1", doc(json!({ "name": "Jane" })), None)
            .await
            .unwrap();
        let tx = db.start_transaction();
        db.merge_one("users", "u1", doc(json!({ "verified": true })), Some(&tx))
            .await
            .unwrap();
        db.merge_one("users", "u2", doc(json!({ "name": "John" })), None)
            .await
            .unwrap();

        tx.commit().await.unwrap();
        assert_eq!(db.count("users", &Filter::All, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_many_and_distinct() {
        let db = Database::new();
        for (id, app) in [("w1", "a1"), ("w2", "a1"), ("w3", "a2")] {
            db.insert_one(
                "workspaces",
                doc(json!({ "_id": id, "application": { "_id": app, "name": "Old" } })),
                None,
            )
            .await
            .unwrap();
        }
        let ids = db
            .distinct("workspaces", ID_FIELD, &Filter::eq("application._id", "a1"), None)
            .await
            .unwrap();
        assert_eq!(ids, vec![json!("w1"), json!("w2")]);

        let result = db
            .update_many(
                "workspaces",
                &Filter::eq("application._id", "a1"),
                &FieldUpdate::new().set("application.name", json!("New")),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 2, modified: 2 });
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let db = Database::new();
        db.fail_writes_to("users");
        let err = db
            .merge_one("users", "u1", doc(json!({ "a": 1 })), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Storage(_)));
        db.clear_fault("users");
        assert!(db.merge_one("users", "u1", doc(json!({ "a": 1 })), None).await.unwrap());
    }
}
