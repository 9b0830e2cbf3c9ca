//! Document store used by the hooks.
//!
//! # Model
//!
//! Documents are JSON bodies addressed by a [`DocumentPath`]. Every document
//! lives in exactly one collection (its parent path). The store offers:
//!
//! - ordered range reads: [`DocumentStore::list`] returns up to `limit`
//!   documents of one collection ordered by document id
//! - atomic transactions with serializable isolation:
//!   [`DocumentStore::commit_transaction`]
//! - batched multi-document writes: [`DocumentStore::commit_batch`]
//! - change notifications through a [`ChangeFeed`]
//!
//! # Backends
//!
//! - [`PgDocumentStore`] - `PostgreSQL`, table `documents`
//! - [`MemoryDocumentStore`] - in-process, used by tests and local runs
//!
//! # Migrations
//!
//! Migrations are stored in `crates/functions/migrations/` and run via:
//! ```bash
//! cargo run -p zone-editor-cli -- migrate
//! ```

pub mod changes;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use secrecy::ExposeSecret;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use zone_editor_core::{CollectionPath, DocumentId, DocumentPath, PathError};

pub use changes::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription};
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

/// Length of store-allocated document ids.
pub const GENERATED_ID_LEN: usize = 20;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction lost a conflict with a concurrent writer and was
    /// rolled back. Safe to retry.
    #[error("transaction aborted by a concurrent write")]
    Aborted,

    /// A create precondition failed because the document exists.
    #[error("document already exists: {0}")]
    AlreadyExists(DocumentPath),

    /// A path read from storage or passed in was malformed.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A document body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store is not reachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failed operation may succeed if simply retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path of the document.
    pub path: DocumentPath,
    /// JSON body.
    pub data: serde_json::Value,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// The document id (last path segment).
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.path.id()
    }

    /// Deserialize the body into a typed record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// One write inside a transaction or batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create a document; fails if it already exists.
    Create {
        path: DocumentPath,
        data: serde_json::Value,
    },
    /// Create or overwrite a document.
    Set {
        path: DocumentPath,
        data: serde_json::Value,
    },
    /// Delete a document; deleting a missing document is a no-op.
    Delete { path: DocumentPath },
}

impl Write {
    /// Path the write targets.
    #[must_use]
    pub const fn path(&self) -> &DocumentPath {
        match self {
            Self::Create { path, .. } | Self::Set { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// An ordered set of writes committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    /// Create an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Add a create-if-absent write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if `data` cannot be serialized.
    pub fn create<T: Serialize>(
        &mut self,
        path: DocumentPath,
        data: &T,
    ) -> Result<&mut Self, StoreError> {
        let data = serde_json::to_value(data)?;
        self.writes.push(Write::Create { path, data });
        Ok(self)
    }

    /// Add a create-or-overwrite write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if `data` cannot be serialized.
    pub fn set<T: Serialize>(
        &mut self,
        path: DocumentPath,
        data: &T,
    ) -> Result<&mut Self, StoreError> {
        let data = serde_json::to_value(data)?;
        self.writes.push(Write::Set { path, data });
        Ok(self)
    }

    /// Add a delete.
    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.writes.push(Write::Delete { path });
        self
    }

    /// Number of writes in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the batch has no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The writes in submission order.
    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Write>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

/// Transactional document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Allocate a new, unpredictable document id for `collection`.
    ///
    /// The id is not reserved; a create write with a must-not-exist
    /// precondition is what makes it unique.
    fn allocate_id(&self, _collection: &CollectionPath) -> DocumentId {
        generate_document_id()
    }

    /// Read one document.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Read up to `limit` documents of a collection, ordered by document id.
    async fn list(
        &self,
        collection: &CollectionPath,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    /// Commit writes atomically with serializable isolation.
    ///
    /// Either every write is applied or none is. Returns
    /// `StoreError::Aborted` when a concurrent writer won a conflict.
    async fn commit_transaction(&self, writes: WriteBatch) -> Result<(), StoreError>;

    /// Commit a batch of writes as one durable unit.
    async fn commit_batch(&self, writes: WriteBatch) -> Result<(), StoreError>;

    /// Change notifications for committed writes.
    fn changes(&self) -> &ChangeFeed;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Generate a random 20 character alphanumeric document id.
#[must_use]
pub fn generate_document_id() -> DocumentId {
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect();
    DocumentId::new(id)
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_alphanumeric() {
        let id = generate_document_id();
        assert_eq!(id.as_str().len(), GENERATED_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_document_id(), id);
    }

    #[test]
    fn test_only_aborts_are_retryable() {
        assert!(StoreError::Aborted.is_retryable());
        assert!(!StoreError::Unavailable("down".into()).is_retryable());
    }

    #[test]
    fn test_batch_keeps_submission_order() {
        let a = DocumentPath::parse("c/a").unwrap();
        let b = DocumentPath::parse("c/b").unwrap();
        let mut batch = WriteBatch::new();
        batch.delete(b.clone()).delete(a.clone());
        let paths: Vec<_> = batch.writes().iter().map(Write::path).collect();
        assert_eq!(paths, [&b, &a]);
        assert_eq!(batch.len(), 2);
    }
}
