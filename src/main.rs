// Entry point of the marketplace admin tool.
//
// **Architecture Overview:**
// - `core/` = Business logic (interest conversations, account moderation)
// - `infra/` = Implementations of the storage gateway (Supabase, SQLite, memory)
// - `admin/` = Command-line adapters over the core services
//
// This file's job is to:
// 1. Load configuration
// 2. Build the one gateway the process uses (dependency injection)
// 3. Run the requested command and report its outcome

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "admin/admin_layer.rs"]
mod admin;
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::admin::{AdminCommand, Services};
use crate::config::{AppConfig, StorageBackend};
use crate::core::gateway::StorageGateway;
use crate::core::interests::Author;
use crate::infra::storage::{InMemoryGateway, SqliteGateway};
use crate::infra::supabase::SupabaseGateway;
use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for commands that ran but left state an operator must look at
/// (partial moderation, divergent ban state).
const EXIT_NEEDS_ATTENTION: i32 = 2;

#[derive(Parser)]
#[command(name = "marketplace-admin")]
#[command(about = "Moderate marketplace interests and user accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: AdminCommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

async fn execute<G: StorageGateway>(
    gateway: Arc<G>,
    command: AdminCommand,
    moderator: Option<Author>,
) -> Result<admin::commands::CommandOutput> {
    let services = Services::new(gateway, moderator);
    admin::run(command, &services).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // RUST_LOG wins; --verbose raises the default
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    // Read-only commands work without a moderator identity
    let moderator = config
        .moderator_id()
        .ok()
        .map(|id| Author::new(id, config.moderator_name.clone()));

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // One gateway per process, shared by every service.

    let output = match config.backend {
        StorageBackend::Supabase => {
            let gateway = Arc::new(SupabaseGateway::new(
                &config.supabase_url,
                &config.supabase_service_key,
            ));
            execute(gateway, cli.command, moderator).await?
        }
        StorageBackend::Sqlite => {
            let gateway = Arc::new(SqliteGateway::new(&config.sqlite_path).await?);
            execute(gateway, cli.command, moderator).await?
        }
        StorageBackend::Memory => {
            let gateway = InMemoryGateway::new();
            if let Some(path) = &config.memory_seed_path {
                let loaded = gateway.load_seed(Path::new(path))?;
                tracing::info!(path = %path, rows = loaded, "Seeded in-memory storage");
            }
            execute(Arc::new(gateway), cli.command, moderator).await?
        }
    };

    println!("{}", output.text);
    if !output.success {
        std::process::exit(EXIT_NEEDS_ATTENTION);
    }
    Ok(())
}
