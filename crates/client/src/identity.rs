//! Identity provider seam.
//!
//! [`IdentityProvider`] is what the session manager talks to for
//! interactive sign-in, token issuance and sign-out. [`HttpIdentityProvider`]
//! implements it against the provider's REST API; tests script their own.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use zone_editor_core::Identity;

use crate::config::ClientConfig;
use crate::token::IdToken;

/// Ways an interactive sign-in ends without the user finishing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user closed the sign-in popup.
    PopupClosedByUser,
    /// The browser blocked the popup.
    PopupBlocked,
    /// A newer sign-in request replaced this one.
    CancelledPopupRequest,
}

impl CancelReason {
    /// Classify a provider error code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.strip_prefix("auth/").unwrap_or(code);
        match code {
            "popup-closed-by-user" => Some(Self::PopupClosedByUser),
            "popup-blocked" => Some(Self::PopupBlocked),
            "cancelled-popup-request" => Some(Self::CancelledPopupRequest),
            _ => None,
        }
    }

    /// Message shown to the user.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::PopupClosedByUser => "Sign-in was cancelled",
            Self::PopupBlocked => "Popup was blocked by your browser",
            Self::CancelledPopupRequest => "Sign-in request was cancelled",
        }
    }
}

/// Errors reported by an identity provider.
#[derive(Debug, Error)]
pub enum IdentityProviderError {
    /// The user abandoned the interactive flow.
    #[error("sign-in cancelled: {}", .0.user_message())]
    Cancelled(CancelReason),

    /// The provider refused the request.
    #[error("identity provider rejected the request: {code}: {message}")]
    Rejected { code: String, message: String },

    /// No identity is signed in with the provider.
    #[error("no identity is signed in")]
    NotSignedIn,

    /// The provider could not be reached.
    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

impl IdentityProviderError {
    /// Build an error from a provider error code, recognising cancellations.
    #[must_use]
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        CancelReason::from_code(&code).map_or_else(
            || Self::Rejected {
                code,
                message: message.into(),
            },
            Self::Cancelled,
        )
    }
}

impl From<reqwest::Error> for IdentityProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// External identity and credential provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Identity persisted from an earlier session, if any.
    async fn restore(&self) -> Result<Option<Identity>, IdentityProviderError>;

    /// Run the interactive sign-in flow.
    async fn sign_in(&self) -> Result<Identity, IdentityProviderError>;

    /// Get a signed ID token for `identity`. With `force_refresh` the
    /// provider must mint a new token rather than return a cached one.
    async fn id_token(
        &self,
        identity: &Identity,
        force_refresh: bool,
    ) -> Result<String, IdentityProviderError>;

    /// End the provider-side session.
    async fn sign_out(&self) -> Result<(), IdentityProviderError>;
}

/// Supplies the external credential for an interactive sign-in (an OAuth
/// id token from a popup, a pasted code in a terminal, ...).
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Return `(provider_id, credential)` or a cancellation.
    async fn obtain(&self) -> Result<(String, SecretString), IdentityProviderError>;
}

/// Credential prompt that always returns the same credential.
pub struct StaticCredential {
    provider_id: String,
    credential: SecretString,
}

impl StaticCredential {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, credential: SecretString) -> Self {
        Self {
            provider_id: provider_id.into(),
            credential,
        }
    }
}

#[async_trait]
impl CredentialPrompt for StaticCredential {
    async fn obtain(&self) -> Result<(String, SecretString), IdentityProviderError> {
        Ok((self.provider_id.clone(), self.credential.clone()))
    }
}

// =============================================================================
// HTTP implementation
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorResponse,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

#[derive(Default)]
struct ProviderSession {
    refresh_token: Option<SecretString>,
    id_token: Option<SecretString>,
}

/// Identity provider reached over its REST API.
///
/// Holds the provider refresh token in memory; a refresh token persisted
/// by the embedding application can be handed in with
/// [`HttpIdentityProvider::with_refresh_token`] so [`IdentityProvider::restore`]
/// can resume that session.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    inner: Arc<HttpIdentityProviderInner>,
}

struct HttpIdentityProviderInner {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    prompt: Arc<dyn CredentialPrompt>,
    session: RwLock<ProviderSession>,
}

impl HttpIdentityProvider {
    /// Create a provider client.
    ///
    /// # Errors
    ///
    /// Returns `IdentityProviderError::Transport` if the HTTP client cannot
    /// be built.
    pub fn new(
        config: &ClientConfig,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Result<Self, IdentityProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpIdentityProviderInner {
                client,
                base_url: config.identity_url.clone(),
                api_key: config.api_key.clone(),
                prompt,
                session: RwLock::new(ProviderSession::default()),
            }),
        })
    }

    /// Resume from a persisted refresh token.
    #[must_use]
    pub fn with_refresh_token(self, refresh_token: SecretString) -> Self {
        if let Ok(mut session) = self.inner.session.try_write() {
            session.refresh_token = Some(refresh_token);
        }
        self
    }

    /// Current provider refresh token, for persisting between runs.
    pub async fn refresh_token(&self) -> Option<SecretString> {
        self.inner.session.read().await.refresh_token.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityProviderError> {
        let mut url = self
            .inner
            .base_url
            .join(path)
            .map_err(|e| IdentityProviderError::Transport(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("key", self.inner.api_key.expose_secret());
        Ok(url)
    }

    async fn error_from(response: reqwest::Response) -> IdentityProviderError {
        let status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => {
                // Messages look like "INVALID_REFRESH_TOKEN : details".
                let code = envelope
                    .error
                    .message
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                IdentityProviderError::from_code(code, envelope.error.message)
            }
            Err(_) => IdentityProviderError::Rejected {
                code: status.as_u16().to_string(),
                message: format!("HTTP {status}"),
            },
        }
    }

    #[instrument(skip(self, refresh_token))]
    async fn exchange_refresh_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<RefreshResponse, IdentityProviderError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("v1/token")?)
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let refreshed: RefreshResponse = response.json().await?;

        let mut session = self.inner.session.write().await;
        session.refresh_token = Some(SecretString::from(refreshed.refresh_token.clone()));
        session.id_token = Some(SecretString::from(refreshed.id_token.clone()));
        Ok(refreshed)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn restore(&self) -> Result<Option<Identity>, IdentityProviderError> {
        let Some(refresh_token) = self.refresh_token().await else {
            return Ok(None);
        };

        let refreshed = self.exchange_refresh_token(&refresh_token).await?;
        let claims = IdToken::parse(refreshed.id_token.as_str())
            .map(|token| token.claims().clone())
            .unwrap_or_default();

        let string_claim = |name: &str| {
            claims
                .extra
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        };

        let mut identity = Identity::new(refreshed.user_id.as_str());
        identity.email = string_claim("email");
        identity.display_name = string_claim("name");
        identity.custom_claims = claims;
        debug!(uid = %identity.uid, "Restored identity");
        Ok(Some(identity))
    }

    #[instrument(skip(self))]
    async fn sign_in(&self) -> Result<Identity, IdentityProviderError> {
        let (provider_id, credential) = self.inner.prompt.obtain().await?;

        let response = self
            .inner
            .client
            .post(self.endpoint("v1/accounts:signInWithIdp")?)
            .json(&SignInWithIdpRequest {
                post_body: format!(
                    "id_token={}&providerId={provider_id}",
                    credential.expose_secret()
                ),
                request_uri: "http://localhost",
                return_secure_token: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let signed_in: SignInWithIdpResponse = response.json().await?;

        {
            let mut session = self.inner.session.write().await;
            session.refresh_token = Some(SecretString::from(signed_in.refresh_token));
            session.id_token = Some(SecretString::from(signed_in.id_token));
        }

        let mut identity = Identity::new(signed_in.local_id);
        identity.email = signed_in.email;
        identity.display_name = signed_in.display_name;
        debug!(uid = %identity.uid, "Signed in with identity provider");
        Ok(identity)
    }

    async fn id_token(
        &self,
        _identity: &Identity,
        force_refresh: bool,
    ) -> Result<String, IdentityProviderError> {
        let refresh_token = {
            let session = self.inner.session.read().await;
            if !force_refresh && let Some(token) = &session.id_token {
                return Ok(token.expose_secret().to_string());
            }
            session
                .refresh_token
                .clone()
                .ok_or(IdentityProviderError::NotSignedIn)?
        };

        let refreshed = self.exchange_refresh_token(&refresh_token).await?;
        Ok(refreshed.id_token)
    }

    async fn sign_out(&self) -> Result<(), IdentityProviderError> {
        *self.inner.session.write().await = ProviderSession::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_codes() {
        assert_eq!(
            CancelReason::from_code("auth/popup-closed-by-user"),
            Some(CancelReason::PopupClosedByUser)
        );
        assert_eq!(
            CancelReason::from_code("popup-blocked"),
            Some(CancelReason::PopupBlocked)
        );
        assert_eq!(
            CancelReason::from_code("auth/cancelled-popup-request"),
            Some(CancelReason::CancelledPopupRequest)
        );
        assert_eq!(CancelReason::from_code("auth/network-request-failed"), None);
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            CancelReason::PopupClosedByUser.user_message(),
            "Sign-in was cancelled"
        );
        assert_eq!(
            CancelReason::PopupBlocked.user_message(),
            "Popup was blocked by your browser"
        );
        assert_eq!(
            CancelReason::CancelledPopupRequest.user_message(),
            "Sign-in request was cancelled"
        );
    }

    #[test]
    fn test_error_from_code() {
        assert!(matches!(
            IdentityProviderError::from_code("auth/popup-blocked", "blocked"),
            IdentityProviderError::Cancelled(CancelReason::PopupBlocked)
        ));
        assert!(matches!(
            IdentityProviderError::from_code("INVALID_REFRESH_TOKEN", "bad"),
            IdentityProviderError::Rejected { code, .. } if code == "INVALID_REFRESH_TOKEN"
        ));
    }
}
