//! Identity issued by the external identity provider.

use serde::{Deserialize, Serialize};

use super::claims::Claims;
use super::id::IdentityId;

/// Number of uid characters used in the fallback display label.
const FALLBACK_LABEL_UID_CHARS: usize = 8;

/// Errors raised when identity input is malformed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The uid is missing or blank.
    #[error("identity is missing a uid")]
    MissingUid,
}

/// An authenticated principal.
///
/// Field names follow the identity provider's wire format (`uid`,
/// `displayName`, `email`, `customClaims`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Opaque unique id assigned by the provider.
    #[serde(default)]
    pub uid: IdentityId,
    /// Human readable name, if the provider knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Email address, if the provider knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Custom claims currently stored on the identity.
    #[serde(default)]
    pub custom_claims: Claims,
}

impl Identity {
    /// Create an identity with only a uid.
    #[must_use]
    pub fn new(uid: impl Into<IdentityId>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            custom_claims: Claims::default(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Check that the identity carries a usable uid.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::MissingUid` if the uid is empty or whitespace.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.uid.as_str().trim().is_empty() {
            return Err(IdentityError::MissingUid);
        }
        Ok(())
    }

    /// Label used to name the identity's tenant.
    ///
    /// Prefers the display name, then the email, then `User <uid prefix>`.
    #[must_use]
    pub fn display_label(&self) -> String {
        let non_blank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        non_blank(&self.display_name)
            .or_else(|| non_blank(&self.email))
            .unwrap_or_else(|| {
                let prefix: String = self
                    .uid
                    .as_str()
                    .chars()
                    .take(FALLBACK_LABEL_UID_CHARS)
                    .collect();
                format!("User {prefix}")
            })
    }
}
