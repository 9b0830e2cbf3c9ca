//! HTTP routes for the hook server.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                      - Liveness check
//! GET  /health/ready                                - Readiness check (pings the store)
//!
//! # Hooks (signed, see middleware::hook_signature)
//! POST /hooks/identity/before-create                - Provision tenant for a new identity
//! POST /hooks/tenants/{tenantId}/zones/{zoneId}/deleted - Cascade delete zone dependents
//! ```

pub mod health;
pub mod hooks;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{request_id_middleware, verify_hook_signature};
use crate::state::AppState;

/// Create the signed hook routes.
pub fn hook_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/identity/before-create", post(hooks::before_create))
        .route(
            "/tenants/{tenant_id}/zones/{zone_id}/deleted",
            post(hooks::zone_deleted),
        )
        .route_layer(from_fn_with_state(state, verify_hook_signature))
}

/// Create the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/hooks", hook_routes(state.clone()))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
            tracing::info_span!(
                "hook_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
        .with_state(state)
}
