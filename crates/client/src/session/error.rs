//! Session error types.

use thiserror::Error;

use crate::identity::{CancelReason, IdentityProviderError};
use crate::token::TokenError;
use crate::transport::TransportError;

/// Errors surfaced by [`super::SessionManager`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// No token is held, so the call was never sent.
    #[error("no token available; sign in first")]
    NoTokenAvailable,

    /// The API rejected the token with 401.
    #[error("authorization expired")]
    AuthExpired(#[source] TransportError),

    /// The user abandoned interactive sign-in.
    #[error("{}", .0.user_message())]
    UserCancelled(CancelReason),

    /// Interactive sign-in failed for another reason.
    #[error("sign-in failed")]
    SignInFailed(#[source] IdentityProviderError),

    /// The provider would not issue a token.
    #[error("token fetch failed")]
    TokenFetch(#[source] IdentityProviderError),

    /// The provider issued something that is not a readable token.
    #[error("invalid token")]
    InvalidToken(#[from] TokenError),

    /// The API call failed with something other than 401.
    #[error("request failed")]
    Transport(#[source] TransportError),

    /// The token carries no `tenantId` claim.
    #[error("token has no tenant claim")]
    NoTenant,
}

impl SessionError {
    /// Whether the session survives this error.
    ///
    /// Only user cancellation is recoverable; every other failure ends in a
    /// signed-out session or never had one.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UserCancelled(_))
    }

    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UserCancelled(reason) => reason.user_message().to_string(),
            Self::NoTokenAvailable | Self::AuthExpired(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::SignInFailed(e) => format!("Sign-in failed: {e}"),
            other => other.to_string(),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        if err.is_auth_expired() {
            Self::AuthExpired(err)
        } else {
            Self::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let unauthorized = TransportError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(matches!(
            SessionError::from(unauthorized),
            SessionError::AuthExpired(_)
        ));

        let server = TransportError::Status {
            status: 500,
            body: String::new(),
        };
        assert!(matches!(SessionError::from(server), SessionError::Transport(_)));
    }

    #[test]
    fn test_only_cancellation_is_recoverable() {
        assert!(SessionError::UserCancelled(CancelReason::PopupBlocked).is_recoverable());
        assert!(!SessionError::NoTokenAvailable.is_recoverable());
        assert!(!SessionError::NoTenant.is_recoverable());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            SessionError::UserCancelled(CancelReason::PopupClosedByUser).user_message(),
            "Sign-in was cancelled"
        );
        assert!(SessionError::NoTokenAvailable
            .user_message()
            .contains("sign in again"));
    }
}
