//! Hook handlers called by the identity provider and the store trigger.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::{error, info, instrument};

use zone_editor_core::{ClaimsPatch, Identity, TenantId, ZoneId, validate_segment};

use crate::error::{HookError, Result};
use crate::services::cascade::CascadeDeleter;
use crate::services::provisioning::TenantProvisioner;
use crate::state::AppState;

/// Response to the identity-creation hook.
///
/// The identity provider merges `customClaims` into the identity it is
/// about to create.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeCreateResponse {
    pub custom_claims: ClaimsPatch,
}

/// `POST /hooks/identity/before-create`
///
/// Provisions the tenant for a new identity. A non-2xx response aborts the
/// identity creation.
#[instrument(skip(state, body))]
pub async fn before_create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BeforeCreateResponse>> {
    let identity: Identity = serde_json::from_slice(&body)
        .map_err(|e| HookError::BadRequest(format!("invalid identity payload: {e}")))?;

    let provisioned = TenantProvisioner::new(state.store())
        .provision(&identity)
        .await?;

    Ok(Json(BeforeCreateResponse {
        custom_claims: provisioned.claims,
    }))
}

/// `POST /hooks/tenants/{tenantId}/zones/{zoneId}/deleted`
///
/// Removes the deleted zone's dependents. Ids that are not a single path
/// segment are rejected with 400. Otherwise always answers 204: failures are
/// logged and reported to Sentry, and the cascade is safe to re-run.
#[instrument(skip(state), fields(tenant_id = %tenant_id, zone_id = %zone_id))]
pub async fn zone_deleted(
    State(state): State<AppState>,
    Path((tenant_id, zone_id)): Path<(TenantId, ZoneId)>,
) -> Result<StatusCode> {
    validate_segment(tenant_id.as_str())?;
    validate_segment(zone_id.as_str())?;

    match CascadeDeleter::new(state.store())
        .delete_zone_dependents(&tenant_id, &zone_id)
        .await
    {
        Ok(report) => {
            info!(deleted = report.total_deleted(), "Zone dependents removed");
        }
        Err(e) => {
            let event_id = sentry::capture_error(&e);
            error!(
                error = %e,
                collection = %e.collection(),
                sentry_event_id = %event_id,
                "Cascade delete failed"
            );
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
