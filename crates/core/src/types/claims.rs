//! Custom claims carried on identities and their tokens.

use serde::{Deserialize, Deserializer, Serialize};

use super::id::TenantId;
use super::status::Role;

/// Claim name holding the tenant id.
pub const TENANT_ID_CLAIM: &str = "tenantId";

/// Claims embedded in an ID token.
///
/// Only `tenantId` and `role` are interpreted; every other claim (standard
/// JWT fields such as `sub` or `exp`, or provider specific ones) is kept in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Tenant the identity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Role within the tenant. Unrecognised values deserialize as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_role"
    )]
    pub role: Option<Role>,
    /// All other claims.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Merge a claims patch into these claims, replacing the tenant id.
    pub fn merge(&mut self, patch: &ClaimsPatch) {
        self.tenant_id = Some(patch.tenant_id.clone());
    }
}

/// Claims written onto a new identity by tenant provisioning.
///
/// Serializes as `{"tenantId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsPatch {
    /// Id of the freshly provisioned tenant.
    pub tenant_id: TenantId,
}

impl ClaimsPatch {
    /// Create a patch assigning the given tenant.
    #[must_use]
    pub const fn tenant(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_parse_token_payload() {
        let claims: Claims = serde_json::from_str(
            r#"{"sub":"u1","exp":1700000000,"tenantId":"t-42","role":"editor"}"#,
        )
        .unwrap();

        assert_eq!(claims.tenant_id, Some(TenantId::new("t-42")));
        assert_eq!(claims.role, Some(Role::Editor));
        assert_eq!(claims.extra.get("sub").unwrap(), "u1");
        assert!(!claims.extra.contains_key(TENANT_ID_CLAIM));
    }

    #[test]
    fn test_unknown_role_is_dropped() {
        let claims: Claims = serde_json::from_str(r#"{"role":"superuser"}"#).unwrap();
        assert!(claims.role.is_none());
    }

    #[test]
    fn test_claims_without_tenant() {
        let claims: Claims = serde_json::from_str(r#"{"sub":"u1"}"#).unwrap();
        assert!(claims.tenant_id.is_none());
    }

    #[test]
    fn test_patch_wire_format() {
        let patch = ClaimsPatch::tenant(TenantId::new("t-1"));
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "tenantId": "t-1" })
        );
    }

    #[test]
    fn test_merge_sets_tenant() {
        let mut claims = Claims::default();
        claims.merge(&ClaimsPatch::tenant(TenantId::new("t-9")));
        assert_eq!(claims.tenant_id, Some(TenantId::new("t-9")));
    }
}
