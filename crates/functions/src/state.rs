//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{FunctionsConfig, StoreBackend};
use crate::db::{self, DocumentStore, MemoryDocumentStore, PgDocumentStore};
use crate::middleware::HookSigner;

/// Error building the document store for the configured backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreInitError {
    #[error("postgres store selected but no database url configured")]
    MissingDatabaseUrl,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// document store, the hook signer and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: FunctionsConfig,
    store: Arc<dyn DocumentStore>,
    signer: HookSigner,
}

impl AppState {
    /// Create a new application state over an existing store.
    #[must_use]
    pub fn new(config: FunctionsConfig, store: Arc<dyn DocumentStore>) -> Self {
        let signer = HookSigner::new(config.hook_secret.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                signer,
            }),
        }
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &FunctionsConfig {
        &self.inner.config
    }

    /// Get a reference to the document store.
    #[must_use]
    pub fn store(&self) -> &dyn DocumentStore {
        self.inner.store.as_ref()
    }

    /// Shared handle to the document store.
    #[must_use]
    pub fn store_handle(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.inner.store)
    }

    /// Get a reference to the hook request signer.
    #[must_use]
    pub fn signer(&self) -> &HookSigner {
        &self.inner.signer
    }
}

/// Build the document store selected by the configuration.
///
/// # Errors
///
/// Returns `StoreInitError` if the `PostgreSQL` pool cannot be created.
pub async fn connect_store(config: &FunctionsConfig) -> Result<Arc<dyn DocumentStore>, StoreInitError> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_ref()
                .ok_or(StoreInitError::MissingDatabaseUrl)?;
            let pool = db::create_pool(url).await?;
            Ok(Arc::new(PgDocumentStore::new(pool)))
        }
    }
}
