//! Fixed operational bounds shared by the hooks and the client.

use std::time::Duration;

/// Maximum number of documents removed by one cascade delete batch.
pub const CASCADE_BATCH_SIZE: usize = 100;

/// Sub-collections stored under every zone document.
///
/// Adding a new dependent kind requires extending this list; the cascade
/// deleter only ever walks the names declared here.
pub const ZONE_SUBCOLLECTIONS: &[&str] = &["people", "locations"];

/// Lifetime of an ID token issued by the identity provider.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Period of the client's scheduled token refresh.
pub const TOKEN_REFRESH_PERIOD: Duration = Duration::from_secs(50 * 60);

/// How long the client waits for the first auth state check.
pub const AUTH_READY_TIMEOUT: Duration = Duration::from_secs(10);

const _: () = assert!(
    TOKEN_REFRESH_PERIOD.as_secs() < TOKEN_LIFETIME.as_secs(),
    "token refresh must fire before the token expires"
);

const _: () = assert!(CASCADE_BATCH_SIZE > 0);
