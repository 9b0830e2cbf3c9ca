//! Integration tests for tenant provisioning.
//!
//! These drive the identity-creation hook over HTTP and check the stored
//! tenant, the returned claim, and what a client reads back from a token
//! carrying that claim.

use axum::http::StatusCode;
use serde_json::json;

use zone_editor_client::IdToken;
use zone_editor_client::token::encode_unsigned;
use zone_editor_core::{CollectionPath, DocumentPath, NewTenant, TenantId, TenantStatus};
use zone_editor_functions::db::DocumentStore;
use zone_editor_functions::services::TenantProvisioner;
use zone_editor_integration_tests::TestContext;

// =============================================================================
// Hook Round Trip
// =============================================================================

#[tokio::test]
async fn test_new_identity_gets_tenant_and_claim() {
    let ctx = TestContext::new();

    let (status, body) = ctx
        .identity_created(&json!({ "uid": "abc123", "email": "owner@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    let tenant_id = TenantId::new(body["customClaims"]["tenantId"].as_str().unwrap());

    let doc = ctx
        .store
        .get(&DocumentPath::tenant(&tenant_id))
        .await
        .unwrap()
        .expect("tenant document exists");
    let record: NewTenant = doc.decode().unwrap();
    assert_eq!(record.name, "owner@example.com");
    assert_eq!(record.owner_id.as_str(), "abc123");
    assert_eq!(record.status, TenantStatus::Active);
}

#[tokio::test]
async fn test_client_reads_tenant_from_issued_token() {
    let ctx = TestContext::new();
    let (_, body) = ctx.identity_created(&json!({ "uid": "u-42" })).await;

    // The provider copies the hook's claims into every token it issues.
    let mut payload = body["customClaims"].clone();
    payload["sub"] = json!("u-42");
    payload["exp"] = json!(chrono::Utc::now().timestamp() + 3600);
    let token = IdToken::parse(encode_unsigned(&payload)).unwrap();

    let tenant_id = token.tenant_id().expect("tenant claim present");
    assert_eq!(
        tenant_id.as_str(),
        body["customClaims"]["tenantId"].as_str().unwrap()
    );
    assert!(
        ctx.store
            .get(&DocumentPath::tenant(tenant_id))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_anonymous_identity_name() {
    let ctx = TestContext::new();
    let (_, body) = ctx.identity_created(&json!({ "uid": "abc123" })).await;
    let tenant_id = TenantId::new(body["customClaims"]["tenantId"].as_str().unwrap());

    let record: NewTenant = ctx
        .store
        .get(&DocumentPath::tenant(&tenant_id))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(record.name, "User abc123");
}

#[tokio::test]
async fn test_missing_uid_aborts_creation() {
    let ctx = TestContext::new();

    let (status, body) = ctx.identity_created(&json!({ "displayName": "Nobody" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
    assert_eq!(ctx.store.count(&CollectionPath::tenants()), 0);
}

// =============================================================================
// Failure And Contention
// =============================================================================

#[tokio::test]
async fn test_contention_still_yields_one_tenant() {
    let ctx = TestContext::new();
    ctx.store.inject_transaction_aborts(3);

    let (status, body) = ctx.identity_created(&json!({ "uid": "busy" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.store.count(&CollectionPath::tenants()), 1);
    let tenant_id = TenantId::new(body["customClaims"]["tenantId"].as_str().unwrap());
    assert!(
        ctx.store
            .get(&DocumentPath::tenant(&tenant_id))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_store_failure_leaves_no_tenant() {
    let ctx = TestContext::new();
    ctx.store.inject_transaction_failure("disk full");

    let (status, body) = ctx.identity_created(&json!({ "uid": "unlucky" })).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["status"], "INTERNAL");
    assert!(body.get("customClaims").is_none());
    assert_eq!(ctx.store.count(&CollectionPath::tenants()), 0);
}

#[tokio::test]
async fn test_redelivered_event_creates_second_tenant() {
    let ctx = TestContext::new();
    let identity = json!({ "uid": "twice" });

    let (_, first) = ctx.identity_created(&identity).await;
    let (_, second) = ctx.identity_created(&identity).await;

    assert_ne!(
        first["customClaims"]["tenantId"],
        second["customClaims"]["tenantId"]
    );
    assert_eq!(ctx.store.count(&CollectionPath::tenants()), 2);
}

#[tokio::test]
async fn test_tenant_creation_is_published() {
    let ctx = TestContext::new();
    let mut subscription = ctx.store.changes().subscribe(CollectionPath::tenants());

    let (_, body) = ctx.identity_created(&json!({ "uid": "watched" })).await;

    let event = subscription.try_next().expect("creation event");
    assert_eq!(
        event.path.id().as_str(),
        body["customClaims"]["tenantId"].as_str().unwrap()
    );
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[tokio::test]
#[ignore = "requires a PostgreSQL database (FUNCTIONS_DATABASE_URL)"]
async fn test_provision_against_postgres() {
    let url = std::env::var("FUNCTIONS_DATABASE_URL").expect("FUNCTIONS_DATABASE_URL");
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    sqlx::migrate!("../functions/migrations").run(&pool).await.unwrap();
    let store = zone_editor_functions::db::PgDocumentStore::new(pool);

    let provisioned = TenantProvisioner::new(&store)
        .provision(&zone_editor_core::Identity::new("pg-user"))
        .await
        .unwrap();

    let doc = store
        .get(&DocumentPath::tenant(&provisioned.tenant.id))
        .await
        .unwrap()
        .expect("tenant stored");
    let record: NewTenant = doc.decode().unwrap();
    assert_eq!(record.owner_id.as_str(), "pg-user");
    assert_eq!(provisioned.claims.tenant_id, provisioned.tenant.id);
}
