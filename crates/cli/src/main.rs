//! Zone Editor CLI - Database migrations and maintenance tools.
//!
//! # Usage
//!
//! ```bash
//! # Run document store migrations
//! ze-cli migrate
//!
//! # Provision a tenant for an identity by hand
//! ze-cli tenant provision --uid abc123 --email owner@example.com
//!
//! # Re-run the cascade delete for a removed zone
//! ze-cli zone cascade --tenant t1 --zone z1
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `tenant provision` - Create a tenant the way the identity hook does
//! - `zone cascade` - Drain a deleted zone's dependent sub-collections
//!
//! All commands read `FUNCTIONS_DATABASE_URL` (falling back to `DATABASE_URL`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ze-cli")]
#[command(author, version, about = "Zone Editor CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },
    /// Zone maintenance
    Zone {
        #[command(subcommand)]
        action: ZoneAction,
    },
}

#[derive(Subcommand)]
enum TenantAction {
    /// Provision a tenant for an identity and print its claims
    Provision {
        /// Identity uid
        #[arg(short, long)]
        uid: String,

        /// Identity display name
        #[arg(short = 'n', long)]
        display_name: Option<String>,

        /// Identity email address
        #[arg(short, long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum ZoneAction {
    /// Delete the dependent documents of a removed zone
    Cascade {
        /// Owning tenant id
        #[arg(short, long)]
        tenant: String,

        /// Deleted zone id
        #[arg(short, long)]
        zone: String,

        /// Documents per delete batch
        #[arg(short, long, default_value_t = zone_editor_core::limits::CASCADE_BATCH_SIZE)]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ze_cli=info,zone_editor_functions=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Tenant { action } => match action {
            TenantAction::Provision {
                uid,
                display_name,
                email,
            } => {
                commands::tenant::provision(&uid, display_name, email).await?;
            }
        },
        Commands::Zone { action } => match action {
            ZoneAction::Cascade {
                tenant,
                zone,
                batch_size,
            } => {
                commands::zone::cascade(&tenant, &zone, batch_size).await?;
            }
        },
    }
    Ok(())
}
