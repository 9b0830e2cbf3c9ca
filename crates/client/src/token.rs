//! ID tokens issued by the identity provider.
//!
//! Tokens are JWTs. The client never verifies the signature (the API does
//! that); it only reads the payload to learn the claims, chiefly
//! `tenantId`, and the expiry.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use zone_editor_core::{Claims, TenantId};

/// Errors decoding an ID token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a JWT: {0}")]
    Malformed(&'static str),
    #[error("token payload could not be decoded: {0}")]
    Payload(String),
}

/// A signed ID token together with its decoded claims.
#[derive(Clone)]
pub struct IdToken {
    raw: SecretString,
    claims: Claims,
    expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for IdToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdToken")
            .field("raw", &"[REDACTED]")
            .field("tenant_id", &self.claims.tenant_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl IdToken {
    /// Decode a raw JWT.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` if the token does not have three segments or the
    /// payload is not base64url-encoded JSON.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TokenError> {
        let raw = raw.into();
        let mut parts = raw.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three dot-separated segments"));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenError::Payload(e.to_string()))?;
        let claims: Claims =
            serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))?;

        let expires_at = claims
            .extra
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Ok(Self {
            raw: SecretString::from(raw),
            claims,
            expires_at,
        })
    }

    /// Claims embedded at issuance.
    #[must_use]
    pub const fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The `tenantId` claim, if present.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<&TenantId> {
        self.claims.tenant_id.as_ref()
    }

    /// Expiry from the `exp` claim.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token expires within `seconds` from now.
    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now().timestamp() >= exp.timestamp() - seconds)
    }

    /// Whether the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    /// `Bearer <token>` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.raw.expose_secret())
    }

    /// The raw token.
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.raw
    }
}

/// Encode an unsigned JWT (`alg: none`) with the given payload, the form
/// the local auth emulator issues.
#[must_use]
pub fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.")
}
