mod admin;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::admin::AdminCommands;

#[derive(Debug, Parser)]
#[command(name = "bazaar-cli")]
#[command(about = "Bazaar store maintenance commands")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage admin accounts
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Facet filter maintenance
    Filters {
        #[command(subcommand)]
        command: FilterCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database answers
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
enum FilterCommands {
    /// Recompute every filter's option index from product tags
    Rebuild,
}

/// Filter directive used when `RUST_LOG` is unset, same as the server.
fn fallback_log_level(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("BAZAAR_LOG_LEVEL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_log_level(|key| std::env::var(key).ok())))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("bazaar-cli: run with --help to list commands");
        return Ok(());
    };

    let pool = bazaar_db::connect_pool_from_env().await?;
    match command {
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            bazaar_db::health_check(&pool).await?;
            println!("database ok");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = bazaar_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Admin { command } => admin::run(&pool, command).await?,
        Commands::Filters {
            command: FilterCommands::Rebuild,
        } => {
            let changed = bazaar_db::rebuild_all_filters(&pool).await?;
            tracing::info!(changed, "filter rebuild finished");
            println!("rebuilt filters, {changed} row(s) changed");
        }
    }

    Ok(())
}
