//! taskcache maintenance CLI.
//!
//! Inspects and clears the SQLite store used by caching tasks. Logging goes to
//! stderr so command output on stdout stays scriptable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskcache_core::{AppConfig, CacheStore, SqliteStore, clear_all_entries};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskcache")]
#[command(author, version, about = "Inspect and clear the taskcache store", long_about = None)]
struct Cli {
    /// Database to operate on instead of the configured one.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show entry counts per category.
    Stats {
        /// Only count entries in this category.
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove every entry in one category.
    Clear {
        #[arg(long)]
        category: String,
    },
    /// Remove every entry in the store.
    ClearAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    let db_path = cli.db_path.unwrap_or(config.db_path);

    tracing::info!(db_path = %db_path.display(), "opening cache store");
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let result = run(&store, cli.command).await;
    store.close().await?;
    result
}

async fn run(store: &SqliteStore, command: Command) -> Result<()> {
    match command {
        Command::Stats { category: Some(category) } => {
            let entries = store.count(Some(&category)).await?;
            println!("{category}\t{entries}");
        }
        Command::Stats { category: None } => {
            let stats = store.categories().await?;
            let total: u64 = stats.iter().map(|s| s.entries).sum();
            for stat in &stats {
                println!("{}\t{}", stat.category, stat.entries);
            }
            println!("total\t{total}");
        }
        Command::Clear { category } => {
            let before = store.count(Some(&category)).await?;
            store.clear(Some(&category)).await?;
            println!("cleared {before} entries from {category}");
        }
        Command::ClearAll => {
            clear_all_entries(store).await?;
            println!("cleared all entries");
        }
    }
    Ok(())
}
