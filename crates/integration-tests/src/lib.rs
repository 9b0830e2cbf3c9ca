//! Integration tests for Zone Editor.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process scenarios (memory store)
//! cargo test -p zone-editor-integration-tests
//!
//! # Including PostgreSQL scenarios
//! FUNCTIONS_DATABASE_URL=postgres://localhost/ze_test \
//!     cargo test -p zone-editor-integration-tests -- --include-ignored
//! ```
//!
//! # Test Categories
//!
//! - `tenant_provisioning` - identity hook through to the client's tenant claim
//! - `zone_cascade` - zone deletion hook draining dependent documents
//! - `session_flow` - client session against a provisioning identity provider
//!
//! [`TestContext`] runs the hook router in process over a
//! [`MemoryDocumentStore`] and signs hook requests the way the caller would.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use zone_editor_core::CollectionPath;
use zone_editor_functions::config::{EmulatorConfig, FunctionsConfig, StoreBackend};
use zone_editor_functions::db::{DocumentStore, MemoryDocumentStore, StoreError, WriteBatch};
use zone_editor_functions::middleware::HookSigner;
use zone_editor_functions::middleware::hook_signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use zone_editor_functions::routes;
use zone_editor_functions::state::AppState;

/// Hook secret used by every test context.
pub const HOOK_SECRET: &str = "Gf4#Lw8!Qs2@Vn6$Hx1%Tb9^Kc3&Rm7*";

/// Hook server configuration for in-process tests.
#[must_use]
pub fn test_config() -> FunctionsConfig {
    FunctionsConfig {
        database_url: None,
        host: std::net::IpAddr::from([127, 0, 0, 1]),
        port: 5001,
        hook_secret: SecretString::from(HOOK_SECRET),
        store: StoreBackend::Memory,
        emulators: EmulatorConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// In-process hook server over a memory store.
pub struct TestContext {
    pub store: Arc<MemoryDocumentStore>,
    router: Router,
    signer: HookSigner,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let state = AppState::new(test_config(), store.clone());
        Self {
            store,
            router: routes::router(state),
            signer: HookSigner::new(SecretString::from(HOOK_SECRET)),
        }
    }

    /// Build a signed hook request.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built.
    #[must_use]
    pub fn signed_request(&self, uri: &str, body: &Value) -> Request<Body> {
        let body = body.to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.signer.sign(timestamp, "POST", uri, body.as_bytes());

        Request::post(uri)
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .expect("valid request")
    }

    /// Send a signed hook and return the status and JSON body (`Null` when
    /// the body is empty).
    ///
    /// # Panics
    ///
    /// Panics if the router fails or the body is not JSON.
    pub async fn post_hook(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(self.signed_request(uri, body)).await
    }

    /// Send a prepared request through the router.
    ///
    /// # Panics
    ///
    /// Panics if the router fails or the body is not JSON.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        if bytes.is_empty() {
            return (status, Value::Null);
        }

        let json = serde_json::from_slice(&bytes).expect("JSON body");
        (status, json)
    }

    /// Call the identity-creation hook.
    pub async fn identity_created(&self, identity: &Value) -> (StatusCode, Value) {
        self.post_hook("/hooks/identity/before-create", identity).await
    }

    /// Call the zone-deletion hook.
    pub async fn zone_deleted(&self, tenant_id: &str, zone_id: &str) -> StatusCode {
        let uri = format!("/hooks/tenants/{tenant_id}/zones/{zone_id}/deleted");
        self.post_hook(&uri, &json!({})).await.0
    }
}

/// Write `count` documents named `{prefix}{index:04}` into `collection`.
///
/// # Errors
///
/// Returns the store error if a batch fails.
pub async fn seed(
    store: &dyn DocumentStore,
    collection: &CollectionPath,
    prefix: &str,
    count: usize,
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    for i in 0..count {
        let id = format!("{prefix}{i:04}");
        batch.set(collection.doc(&id), &json!({ "label": id }))?;
    }
    store.commit_batch(batch).await
}
