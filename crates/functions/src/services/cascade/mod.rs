//! Cascade deletion of a zone's dependent documents.
//!
//! Runs after a zone document has been deleted. Each dependent
//! sub-collection is drained in bounded batches: read up to
//! [`CASCADE_BATCH_SIZE`] documents in id order, delete exactly those in one
//! batch, yield, repeat until a read comes back empty. Sub-collections are
//! processed one after another.
//!
//! The cascade is idempotent. A second run over drained collections issues
//! one empty read per collection and no writes.

mod error;

pub use error::CascadeError;

use tracing::{debug, info, instrument};

use zone_editor_core::limits::{CASCADE_BATCH_SIZE, ZONE_SUBCOLLECTIONS};
use zone_editor_core::{CollectionPath, TenantId, ZoneId};

use crate::db::{DocumentStore, Write, WriteBatch};

/// Work done on one sub-collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: CollectionPath,
    /// Documents included in committed delete batches.
    pub deleted: usize,
    /// Delete batches committed.
    pub batches: usize,
    /// Reads issued, including the final empty one.
    pub reads: usize,
}

/// Work done by one cascade run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub collections: Vec<CollectionReport>,
}

impl CascadeReport {
    /// Documents deleted across all sub-collections.
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.collections.iter().map(|c| c.deleted).sum()
    }

    /// Batches committed across all sub-collections.
    #[must_use]
    pub fn total_batches(&self) -> usize {
        self.collections.iter().map(|c| c.batches).sum()
    }

    /// Report for the named sub-collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection.name() == name)
    }
}

/// Removes the documents that depend on a deleted zone.
pub struct CascadeDeleter<'a> {
    store: &'a dyn DocumentStore,
    batch_size: usize,
    subcollections: &'a [&'a str],
}

impl<'a> CascadeDeleter<'a> {
    /// Create a deleter with the standard batch size and sub-collections.
    #[must_use]
    pub const fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            batch_size: CASCADE_BATCH_SIZE,
            subcollections: ZONE_SUBCOLLECTIONS,
        }
    }

    /// Override the batch size (at least one).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Override the sub-collections to drain.
    #[must_use]
    pub const fn with_subcollections(mut self, subcollections: &'a [&'a str]) -> Self {
        self.subcollections = subcollections;
        self
    }

    /// Delete every document in the zone's dependent sub-collections.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::CascadeDeleteFailed` on the first failed read
    /// or batch. Batches committed before it stay deleted.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, zone_id = %zone_id))]
    pub async fn delete_zone_dependents(
        &self,
        tenant_id: &TenantId,
        zone_id: &ZoneId,
    ) -> Result<CascadeReport, CascadeError> {
        let mut report = CascadeReport::default();

        for name in self.subcollections {
            let collection = CollectionPath::zone_subcollection(tenant_id, zone_id, name);
            let collection_report = self.drain(collection).await?;
            report.collections.push(collection_report);
        }

        info!(
            deleted = report.total_deleted(),
            batches = report.total_batches(),
            "Cascade delete complete"
        );
        Ok(report)
    }

    /// Delete all documents in one collection, batch by batch.
    #[instrument(skip(self), fields(collection = %collection))]
    async fn drain(&self, collection: CollectionPath) -> Result<CollectionReport, CascadeError> {
        let mut report = CollectionReport {
            collection,
            deleted: 0,
            batches: 0,
            reads: 0,
        };

        loop {
            let docs = self
                .store
                .list(&report.collection, self.batch_size)
                .await
                .map_err(|source| CascadeError::CascadeDeleteFailed {
                    collection: report.collection.clone(),
                    source,
                })?;
            report.reads += 1;

            if docs.is_empty() {
                break;
            }

            let batch: WriteBatch = docs
                .into_iter()
                .map(|doc| Write::Delete { path: doc.path })
                .collect();
            let size = batch.len();

            self.store
                .commit_batch(batch)
                .await
                .map_err(|source| CascadeError::CascadeDeleteFailed {
                    collection: report.collection.clone(),
                    source,
                })?;

            report.deleted += size;
            report.batches += 1;
            debug!(size, batches = report.batches, "Deleted batch");

            tokio::task::yield_now().await;
        }

        Ok(report)
    }
}
