//! Tenant provisioning.
//!
//! Runs once per newly created identity, before the identity is usable.
//! A tenant record is written in one transaction and its id is returned as
//! the `tenantId` claim for the identity provider to merge into the new
//! identity. Any failure aborts the identity creation.

mod error;

pub use error::ProvisionError;

use tracing::{debug, info, instrument, warn};

use zone_editor_core::{ClaimsPatch, CollectionPath, Identity, NewTenant, Tenant, TenantId};

use crate::db::{DocumentStore, StoreError, WriteBatch};

/// Attempts made when the store reports contention.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTenant {
    /// The committed tenant.
    pub tenant: Tenant,
    /// Claims to merge into the new identity.
    pub claims: ClaimsPatch,
    /// Transaction attempts used, including the successful one.
    pub attempts: u32,
}

/// Creates the tenant that owns a new identity.
pub struct TenantProvisioner<'a> {
    store: &'a dyn DocumentStore,
    max_attempts: u32,
}

impl<'a> TenantProvisioner<'a> {
    /// Create a provisioner over the given store.
    #[must_use]
    pub const fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            max_attempts: MAX_TRANSACTION_ATTEMPTS,
        }
    }

    /// Override the number of transaction attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Provision a tenant for `identity` and return the claims to assign.
    ///
    /// Not idempotent: calling this twice for one identity creates two
    /// tenants.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::InvalidIdentity` if the uid is empty.
    /// Returns `ProvisionError::ProvisioningFailed` if the transaction
    /// could not be committed.
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    pub async fn provision(&self, identity: &Identity) -> Result<ProvisionedTenant, ProvisionError> {
        identity.validate()?;

        let record = NewTenant::for_owner(identity);
        let collection = CollectionPath::tenants();

        let (tenant_id, attempts) = self
            .run_transaction(|| {
                let id = self.store.allocate_id(&collection);
                let mut tx = WriteBatch::new();
                tx.create(collection.doc(id.as_str()), &record)?;
                Ok((TenantId::new(id.into_inner()), tx))
            })
            .await?;

        info!(tenant_id = %tenant_id, attempts, "Tenant provisioned");

        Ok(ProvisionedTenant {
            claims: ClaimsPatch::tenant(tenant_id.clone()),
            tenant: Tenant::from_record(tenant_id, record),
            attempts,
        })
    }

    /// Commit the transaction produced by `body`, retrying on contention.
    ///
    /// `body` is re-run for every attempt so each attempt gets fresh ids.
    /// Errors raised by `body` itself are returned unchanged; store errors
    /// become `ProvisioningFailed`.
    async fn run_transaction<T, F>(&self, mut body: F) -> Result<(T, u32), ProvisionError>
    where
        F: FnMut() -> Result<(T, WriteBatch), ProvisionError> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            let (value, tx) = body()?;
            match self.store.commit_transaction(tx).await {
                Ok(()) => return Ok((value, attempt)),
                Err(StoreError::Aborted) if attempt < self.max_attempts => {
                    debug!(attempt, "Provisioning transaction aborted, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Provisioning transaction failed");
                    return Err(ProvisionError::ProvisioningFailed(e));
                }
            }
        }
    }
}
