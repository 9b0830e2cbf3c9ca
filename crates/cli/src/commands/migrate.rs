//! Database migration command.
//!
//! ```bash
//! ze-cli migrate
//! ```
//!
//! Migrations live in `crates/functions/migrations/` and are embedded at
//! compile time.

use super::{CommandError, connect_pool};

/// Run the document store migrations.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect_pool().await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../functions/migrations").run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
