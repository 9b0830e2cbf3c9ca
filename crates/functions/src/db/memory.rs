//! In-process document store.
//!
//! All state sits behind one mutex, so a transaction is a single critical
//! section and is trivially serializable. Fault injection hooks let tests
//! reproduce contention and partial cascade failures.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use zone_editor_core::{CollectionPath, DocumentPath};

use super::{
    ChangeEvent, ChangeFeed, ChangeKind, Document, DocumentStore, StoreError, Write, WriteBatch,
};

/// Operation counters, useful for asserting on store traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `get` and `list` calls.
    pub reads: usize,
    /// Committed transactions.
    pub transactions: usize,
    /// Committed batches.
    pub batches: usize,
    /// Documents removed by committed writes.
    pub deleted: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    data: serde_json::Value,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    transaction_aborts: usize,
    transaction_failure: Option<String>,
    batch_failure_after: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by (collection, document id) so a range over one collection
    /// comes back ordered by id.
    documents: BTreeMap<(String, String), Entry>,
    stats: StoreStats,
    faults: Faults,
}

/// Document store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    changes: ChangeFeed,
}

fn key(path: &DocumentPath) -> (String, String) {
    (
        path.parent().as_str().to_owned(),
        path.id().into_inner(),
    )
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))
    }

    /// Make the next `count` transactions fail with `StoreError::Aborted`.
    pub fn inject_transaction_aborts(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.transaction_aborts = count;
        }
    }

    /// Make the next transaction fail with `StoreError::Unavailable`.
    pub fn inject_transaction_failure(&self, message: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.transaction_failure = Some(message.into());
        }
    }

    /// Let `successful` more batches commit, then fail every later batch.
    pub fn inject_batch_failure_after(&self, successful: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.batch_failure_after = Some(successful);
        }
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults = Faults::default();
        }
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.inner
            .lock()
            .map(|inner| inner.stats)
            .unwrap_or_default()
    }

    /// Number of documents directly inside `collection`.
    #[must_use]
    pub fn count(&self, collection: &CollectionPath) -> usize {
        self.inner.lock().map_or(0, |inner| {
            inner
                .documents
                .keys()
                .filter(|(c, _)| c == collection.as_str())
                .count()
        })
    }

    /// Apply writes under the lock. Create preconditions are all checked
    /// before anything is written.
    fn apply(inner: &mut Inner, batch: &WriteBatch) -> Result<Vec<ChangeEvent>, StoreError> {
        for write in batch.writes() {
            if let Write::Create { path, .. } = write
                && inner.documents.contains_key(&key(path))
            {
                return Err(StoreError::AlreadyExists(path.clone()));
            }
        }

        let now = Utc::now();
        let mut events = Vec::with_capacity(batch.len());
        for write in batch.writes() {
            match write {
                Write::Create { path, data } | Write::Set { path, data } => {
                    let previous = inner.documents.insert(
                        key(path),
                        Entry {
                            data: data.clone(),
                            updated_at: now,
                        },
                    );
                    let kind = if previous.is_some() {
                        ChangeKind::Updated
                    } else {
                        ChangeKind::Created
                    };
                    events.push(ChangeEvent::new(kind, path.clone()));
                }
                Write::Delete { path } => {
                    if inner.documents.remove(&key(path)).is_some() {
                        inner.stats.deleted += 1;
                        events.push(ChangeEvent::new(ChangeKind::Deleted, path.clone()));
                    }
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let mut inner = self.lock()?;
        inner.stats.reads += 1;
        Ok(inner.documents.get(&key(path)).map(|entry| Document {
            path: path.clone(),
            data: entry.data.clone(),
            updated_at: entry.updated_at,
        }))
    }

    async fn list(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut inner = self.lock()?;
        inner.stats.reads += 1;
        let start = (collection.as_str().to_owned(), String::new());
        Ok(inner
            .documents
            .range(start..)
            .take_while(|((c, _), _)| c == collection.as_str())
            .take(limit)
            .map(|((_, id), entry)| Document {
                path: collection.doc(id),
                data: entry.data.clone(),
                updated_at: entry.updated_at,
            })
            .collect())
    }

    async fn commit_transaction(&self, writes: WriteBatch) -> Result<(), StoreError> {
        let events = {
            let mut inner = self.lock()?;
            if inner.faults.transaction_aborts > 0 {
                inner.faults.transaction_aborts -= 1;
                return Err(StoreError::Aborted);
            }
            if let Some(message) = inner.faults.transaction_failure.take() {
                return Err(StoreError::Unavailable(message));
            }
            let events = Self::apply(&mut inner, &writes)?;
            inner.stats.transactions += 1;
            events
        };
        self.changes.publish(events);
        Ok(())
    }

    async fn commit_batch(&self, writes: WriteBatch) -> Result<(), StoreError> {
        let events = {
            let mut inner = self.lock()?;
            match inner.faults.batch_failure_after {
                Some(0) => {
                    return Err(StoreError::Unavailable("injected batch failure".to_owned()));
                }
                Some(remaining) => inner.faults.batch_failure_after = Some(remaining - 1),
                None => {}
            }
            let events = Self::apply(&mut inner, &writes)?;
            inner.stats.batches += 1;
            events
        };
        self.changes.publish(events);
        Ok(())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(path: &str) -> DocumentPath {
        DocumentPath::parse(path).unwrap()
    }

    fn collection(path: &str) -> CollectionPath {
        CollectionPath::parse(path).unwrap()
    }

    async fn seed(store: &MemoryDocumentStore, paths: &[&str]) {
        let mut batch = WriteBatch::new();
        for path in paths {
            batch.set(doc(path), &json!({ "seed": true })).unwrap();
        }
        store.commit_batch(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_scoped() {
        let store = MemoryDocumentStore::new();
        seed(&store, &["c/b", "c/a", "c/c", "d/a", "c/a/sub/x"]).await;

        let docs = store.list(&collection("c"), 2).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id().into_inner()).collect();
        assert_eq!(ids, ["a", "b"]);

        assert_eq!(store.list(&collection("c"), 10).await.unwrap().len(), 3);
        assert_eq!(store.list(&collection("c/a/sub"), 10).await.unwrap().len(), 1);
        assert!(store.list(&collection("e"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_precondition_is_atomic() {
        let store = MemoryDocumentStore::new();
        seed(&store, &["c/taken"]).await;

        let mut tx = WriteBatch::new();
        tx.create(doc("c/new"), &json!({})).unwrap();
        tx.create(doc("c/taken"), &json!({})).unwrap();

        let err = store.commit_transaction(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(path) if path.as_str() == "c/taken"));
        assert!(store.get(&doc("c/new")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_aborts_are_consumed() {
        let store = MemoryDocumentStore::new();
        store.inject_transaction_aborts(1);

        let mut tx = WriteBatch::new();
        tx.create(doc("c/a"), &json!({})).unwrap();
        assert!(matches!(
            store.commit_transaction(tx.clone()).await,
            Err(StoreError::Aborted)
        ));
        store.commit_transaction(tx).await.unwrap();
        assert_eq!(store.stats().transactions, 1);
    }

    #[tokio::test]
    async fn test_batch_failure_after() {
        let store = MemoryDocumentStore::new();
        store.inject_batch_failure_after(1);

        seed(&store, &["c/a"]).await;
        let mut batch = WriteBatch::new();
        batch.delete(doc("c/a"));
        assert!(store.commit_batch(batch).await.is_err());
        assert_eq!(store.count(&collection("c")), 1);
    }

    #[tokio::test]
    async fn test_commits_publish_changes() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.changes().subscribe(collection("c"));

        seed(&store, &["c/a"]).await;
        seed(&store, &["c/a"]).await;
        let mut batch = WriteBatch::new();
        batch.delete(doc("c/a")).delete(doc("c/missing"));
        store.commit_batch(batch).await.unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| sub.try_next()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted]
        );
        assert_eq!(store.stats().deleted, 1);
    }
}
