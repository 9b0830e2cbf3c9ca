//! Command implementations.

pub mod migrate;
pub mod tenant;
pub mod zone;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

use zone_editor_core::PathError;
use zone_editor_functions::db::{PgDocumentStore, create_pool};
use zone_editor_functions::services::{CascadeError, ProvisionError};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Cascade(#[from] CascadeError),

    #[error("Invalid id: {0}")]
    InvalidId(#[from] PathError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Read the database URL from `FUNCTIONS_DATABASE_URL` or `DATABASE_URL`.
fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("FUNCTIONS_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("FUNCTIONS_DATABASE_URL"))
}

async fn connect_pool() -> Result<PgPool, CommandError> {
    let url = database_url()?;
    tracing::info!("Connecting to database...");
    Ok(create_pool(&url).await?)
}

async fn connect_store() -> Result<PgDocumentStore, CommandError> {
    Ok(PgDocumentStore::new(connect_pool().await?))
}
