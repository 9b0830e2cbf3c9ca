//! Tenant provisioning error types.

use thiserror::Error;

use zone_editor_core::IdentityError;

use crate::db::StoreError;

/// Errors that can occur while provisioning a tenant for a new identity.
///
/// Any error aborts creation of the identity.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The incoming identity is unusable (e.g. empty uid).
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// The tenant could not be written.
    #[error("tenant provisioning failed: {0}")]
    ProvisioningFailed(#[source] StoreError),
}

impl From<StoreError> for ProvisionError {
    fn from(err: StoreError) -> Self {
        Self::ProvisioningFailed(err)
    }
}
