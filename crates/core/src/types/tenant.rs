//! Tenant records.

use serde::{Deserialize, Serialize};

use super::id::{IdentityId, TenantId};
use super::identity::Identity;
use super::status::TenantStatus;

/// Tenant document body as stored at `tenants/{tenantId}`.
///
/// The id is not part of the body; it is the document's own id and is always
/// allocated by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    /// Display name, derived from the owner's identity.
    pub name: String,
    /// Identity that owns the tenant.
    pub owner_id: IdentityId,
    /// Lifecycle status.
    pub status: TenantStatus,
}

impl NewTenant {
    /// Build the active tenant record for a freshly created identity.
    #[must_use]
    pub fn for_owner(identity: &Identity) -> Self {
        Self {
            name: identity.display_label(),
            owner_id: identity.uid.clone(),
            status: TenantStatus::Active,
        }
    }
}

/// A stored tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Store-assigned id.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Identity that owns the tenant.
    pub owner_id: IdentityId,
    /// Lifecycle status.
    pub status: TenantStatus,
}

impl Tenant {
    /// Combine a stored body with its document id.
    #[must_use]
    pub fn from_record(id: TenantId, record: NewTenant) -> Self {
        Self {
            id,
            name: record.name,
            owner_id: record.owner_id,
            status: record.status,
        }
    }
}
