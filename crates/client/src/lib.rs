//! Zone Editor client - session and token lifecycle.
//!
//! Everything a client needs to talk to the Zone Editor API as a signed-in
//! user:
//!
//! - [`identity`] - Identity provider seam and its REST implementation
//! - [`token`] - ID token decoding (tenant claim, expiry)
//! - [`transport`] - HTTP transport seam for API calls
//! - [`session`] - Sign-in, scheduled refresh and retry-once on 401
//! - [`config`] - Environment configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod identity;
pub mod session;
pub mod token;
pub mod transport;

pub use config::ClientConfig;
pub use identity::{
    CancelReason, CredentialPrompt, HttpIdentityProvider, IdentityProvider, IdentityProviderError,
    StaticCredential,
};
pub use session::{
    RefreshHandle, SessionContext, SessionError, SessionEvent, SessionManager, SessionOptions,
    SessionState, TenantScope,
};
pub use token::IdToken;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, TransportError};
