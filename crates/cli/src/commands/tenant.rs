//! Tenant commands.

use serde_json::json;

use zone_editor_core::Identity;
use zone_editor_functions::services::TenantProvisioner;

use super::{CommandError, connect_store};

/// Provision a tenant for the given identity, the same way the
/// identity-creation hook does, and print the claims to assign.
///
/// Not idempotent: every run creates a new tenant.
pub async fn provision(
    uid: &str,
    display_name: Option<String>,
    email: Option<String>,
) -> Result<(), CommandError> {
    let mut identity = Identity::new(uid);
    identity.display_name = display_name;
    identity.email = email;

    let store = connect_store().await?;
    let provisioned = TenantProvisioner::new(&store).provision(&identity).await?;

    tracing::info!(
        "Tenant created! ID: {}, Name: {}, Attempts: {}",
        provisioned.tenant.id,
        provisioned.tenant.name,
        provisioned.attempts
    );

    let output = serde_json::to_string_pretty(&json!({
        "tenantId": provisioned.tenant.id,
        "customClaims": provisioned.claims,
    }))?;
    #[allow(clippy::print_stdout)]
    {
        println!("{output}");
    }

    Ok(())
}
