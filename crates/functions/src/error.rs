//! Hook error responses with Sentry integration.
//!
//! Hook handlers return `Result<T, HookError>`. Server-side failures are
//! captured to Sentry before responding. Every error body has the shape
//! the identity provider expects from a blocking hook:
//!
//! ```json
//! { "error": { "status": "INVALID_ARGUMENT", "message": "..." } }
//! ```
//!
//! Any non-2xx response from the identity-creation hook aborts the
//! creation of the identity.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use zone_editor_core::PathError;

use crate::services::provisioning::ProvisionError;

/// Error kinds reported to hook callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookErrorKind {
    InvalidArgument,
    Unauthenticated,
    Internal,
}

impl HookErrorKind {
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Caller-facing hook error.
#[derive(Debug, Error)]
pub enum HookError {
    /// Tenant provisioning failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// A path parameter is not a usable id.
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// The request payload could not be understood.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request signature was missing, stale or wrong.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HookError {
    /// Kind reported in the response body.
    #[must_use]
    pub const fn kind(&self) -> HookErrorKind {
        match self {
            Self::Provision(ProvisionError::InvalidIdentity(_))
            | Self::InvalidPath(_)
            | Self::BadRequest(_) => HookErrorKind::InvalidArgument,
            Self::Unauthorized(_) => HookErrorKind::Unauthenticated,
            Self::Provision(ProvisionError::ProvisioningFailed(_)) | Self::Internal(_) => {
                HookErrorKind::Internal
            }
        }
    }

    /// Message safe to return to the caller.
    fn public_message(&self) -> String {
        match self {
            Self::Provision(ProvisionError::ProvisioningFailed(_)) => {
                "Failed to provision tenant".to_string()
            }
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    status: HookErrorKind,
    message: &'a str,
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let kind = self.kind();

        // Capture server errors to Sentry
        if kind == HookErrorKind::Internal {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Hook error"
            );
        } else {
            tracing::warn!(error = %self, kind = ?kind, "Hook request rejected");
        }

        let message = self.public_message();
        let body = ErrorBody {
            error: ErrorDetail {
                status: kind,
                message: &message,
            },
        };

        (kind.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for `HookError`.
pub type Result<T> = std::result::Result<T, HookError>;
