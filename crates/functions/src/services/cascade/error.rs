//! Cascade deletion error types.

use thiserror::Error;

use zone_editor_core::CollectionPath;

use crate::db::StoreError;

/// Errors that can occur while removing a zone's dependent documents.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// A read or batch delete failed. Batches committed before the failure
    /// stay deleted; re-running the cascade finishes the job.
    #[error("cascade delete failed in {collection}: {source}")]
    CascadeDeleteFailed {
        collection: CollectionPath,
        #[source]
        source: StoreError,
    },
}

impl CascadeError {
    /// The sub-collection that was being drained.
    #[must_use]
    pub const fn collection(&self) -> &CollectionPath {
        match self {
            Self::CascadeDeleteFailed { collection, .. } => collection,
        }
    }
}
