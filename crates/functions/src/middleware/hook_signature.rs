//! Signature verification for hook requests.
//!
//! The identity provider and the store trigger sign each request with the
//! shared hook secret:
//!
//! ```text
//! X-Hook-Timestamp: 1760832000
//! X-Hook-Signature: v1=<hex(hmac_sha256(secret, "v1:{timestamp}:{method}:{path}:{body}"))>
//! ```
//!
//! `path` is the request path as sent, before percent-decoding and without
//! the query string. A signature is only valid for the method and path it
//! was computed over.
//!
//! Requests older than five minutes, or whose signature does not match,
//! are rejected with 401 before the handler runs.

use axum::{
    body::{Body, to_bytes},
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::error::HookError;
use crate::state::AppState;

/// Header carrying the unix timestamp the request was signed at.
pub const TIMESTAMP_HEADER: &str = "x-hook-timestamp";

/// Header carrying the `v1=` signature.
pub const SIGNATURE_HEADER: &str = "x-hook-signature";

/// Maximum clock skew between signer and verifier, in seconds.
pub const MAX_SIGNATURE_AGE_SECS: i64 = 300;

/// Largest hook body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const SIGNATURE_VERSION: &str = "v1";

/// Reasons a hook request fails verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("request timestamp outside the allowed window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Signs and verifies hook requests with the shared secret.
#[derive(Clone)]
pub struct HookSigner {
    secret: SecretString,
}

impl std::fmt::Debug for HookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl HookSigner {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Compute the `v1=` signature for a request signed at `timestamp`.
    #[must_use]
    pub fn sign(&self, timestamp: i64, method: &str, path: &str, body: &[u8]) -> String {
        // HMAC accepts keys of any length.
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
        else {
            return String::new();
        };
        mac.update(format!("{SIGNATURE_VERSION}:{timestamp}:{method}:{path}:").as_bytes());
        mac.update(body);
        format!(
            "{SIGNATURE_VERSION}={}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    /// Verify a signature against the current time.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError` if the timestamp is malformed or stale, or
    /// the signature does not match.
    pub fn verify(
        &self,
        timestamp: &str,
        target: &SignedTarget<'_>,
        body: &[u8],
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.verify_at(timestamp, target, body, signature, chrono::Utc::now().timestamp())
    }

    /// Verify a signature against an explicit current time (unix seconds).
    ///
    /// # Errors
    ///
    /// Same as [`HookSigner::verify`].
    pub fn verify_at(
        &self,
        timestamp: &str,
        target: &SignedTarget<'_>,
        body: &[u8],
        signature: &str,
        now: i64,
    ) -> Result<(), SignatureError> {
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;

        if (now - ts).abs() > MAX_SIGNATURE_AGE_SECS {
            return Err(SignatureError::Stale);
        }

        let expected = self.sign(ts, target.method, target.path, body);
        if expected.is_empty() || !constant_time_compare(&expected, signature.trim()) {
            return Err(SignatureError::Mismatch);
        }

        Ok(())
    }
}

/// Method and path a signature is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedTarget<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn header<'a>(request: &'a Request, name: &'static str) -> Result<&'a str, SignatureError> {
    request
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .ok_or(SignatureError::MissingHeader(name))
}

/// Middleware that rejects hook requests without a valid signature.
///
/// The body is buffered so it can be verified, then handed on unchanged.
pub async fn verify_hook_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (timestamp, signature) = match (
        header(&request, TIMESTAMP_HEADER),
        header(&request, SIGNATURE_HEADER),
    ) {
        (Ok(t), Ok(s)) => (t.to_owned(), s.to_owned()),
        (Err(e), _) | (_, Err(e)) => {
            return HookError::Unauthorized(e.to_string()).into_response();
        }
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return HookError::BadRequest(format!("unreadable body: {e}")).into_response(),
    };

    // Nested routers see a stripped URI; sign over the one the caller sent.
    let path = parts
        .extensions
        .get::<OriginalUri>()
        .map_or_else(|| parts.uri.path(), |original| original.0.path());
    let target = SignedTarget {
        method: parts.method.as_str(),
        path,
    };

    if let Err(e) = state.signer().verify(&timestamp, &target, &bytes, &signature) {
        return HookError::Unauthorized(e.to_string()).into_response();
    }
    debug!("Hook signature verified");

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
