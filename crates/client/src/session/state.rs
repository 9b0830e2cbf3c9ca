//! Session states, events and the context snapshot handed to callers.

use std::fmt;

use zone_editor_core::{CollectionPath, DocumentPath, Identity, IdentityId, TenantId, ZoneId};

use super::error::SessionError;
use crate::token::IdToken;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl SessionState {
    /// Whether a token is expected to be held.
    #[must_use]
    pub const fn is_signed_in(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// Notifications for whoever drives the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { uid: IdentityId },
    TokenRefreshed,
    SignedOut,
    /// The user should be taken to the login surface.
    RedirectToLogin { path: String },
}

/// Snapshot of the current session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub identity: Option<Identity>,
    pub tenant_id: Option<TenantId>,
    pub token: Option<IdToken>,
}

impl SessionContext {
    /// Path builder scoped to the session's tenant.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoTenant` when the token carried no tenant claim.
    pub fn tenant_scope(&self) -> Result<TenantScope, SessionError> {
        self.tenant_id
            .clone()
            .map(TenantScope::new)
            .ok_or(SessionError::NoTenant)
    }
}

/// Builds document paths under one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: TenantId,
}

impl TenantScope {
    #[must_use]
    pub const fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// `tenants/{tenantId}`
    #[must_use]
    pub fn tenant(&self) -> DocumentPath {
        DocumentPath::tenant(&self.tenant_id)
    }

    /// `tenants/{tenantId}/zones`
    #[must_use]
    pub fn zones(&self) -> CollectionPath {
        CollectionPath::zones(&self.tenant_id)
    }

    /// `tenants/{tenantId}/zones/{zoneId}`
    #[must_use]
    pub fn zone(&self, zone_id: &ZoneId) -> DocumentPath {
        DocumentPath::zone(&self.tenant_id, zone_id)
    }

    #[must_use]
    pub fn zone_subcollection(&self, zone_id: &ZoneId, name: &str) -> CollectionPath {
        CollectionPath::zone_subcollection(&self.tenant_id, zone_id, name)
    }

    #[must_use]
    pub fn people(&self, zone_id: &ZoneId) -> CollectionPath {
        self.zone_subcollection(zone_id, "people")
    }

    #[must_use]
    pub fn locations(&self, zone_id: &ZoneId) -> CollectionPath {
        self.zone_subcollection(zone_id, "locations")
    }
}
