//! # Hubgraph CLI (`hubgraph`)
//!
//! The `hubgraph` binary manages the local relationship database and runs
//! the sync worker against the configured peer.
//!
//! ## Usage
//!
//! ```bash
//! hubgraph --config ./config/hubgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hubgraph init` | Create the SQLite database and run schema migrations |
//! | `hubgraph sync` | Run a single sync pass against the stored target |
//! | `hubgraph watch` | Sync on an interval until interrupted |
//! | `hubgraph status` | Show the sync watermark and target settings |

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hubgraph::config;
use hubgraph::db;
use hubgraph::migrate;
use hubgraph::store::sqlite::SqliteStore;
use hubgraph::store::Store;
use hubgraph::sync::{CancelToken, HttpTransport, SyncWorker};

/// Hubgraph CLI — a hub-and-spoke relationship engine with incremental
/// one-way sync.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "hubgraph",
    about = "Hubgraph — a hub-and-spoke relationship engine with incremental sync",
    version,
    long_about = "Hubgraph stores relationships as hubs (grouping keys shared by two or more \
    connection endpoints), enforces the hub invariant across all mutations, and pushes \
    whitelisted changes from an append-only change log to a peer instance over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/hubgraph.toml`. Database and sync settings
    /// are read from this file.
    #[arg(long, global = true, default_value = "./config/hubgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (connections, entities, templates, relationtypes, dictionaries,
    /// changelog, syncs, settings). This command is idempotent — running
    /// it multiple times is safe.
    Init,

    /// Run a single sync pass.
    ///
    /// Walks the change log from the stored watermark and pushes every
    /// whitelisted record to the configured target. Does nothing when
    /// sync is unconfigured or inactive.
    Sync,

    /// Sync continuously until interrupted.
    ///
    /// Runs sync passes on the configured interval, re-authenticating
    /// when the target rejects the session. Stops cleanly on Ctrl-C.
    Watch {
        /// Override the pass interval from config, in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Show the sync watermark and target settings.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = Arc::new(SqliteStore::new(pool));
            let worker = SyncWorker::new(store, Arc::new(HttpTransport::new()))
                .with_credentials(&cfg.sync.username, &cfg.sync.password);
            if worker.sync_once().await? {
                println!("Sync pass completed.");
            } else {
                println!("Sync is not configured or inactive; nothing to do.");
            }
        }
        Commands::Watch { interval_ms } => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = Arc::new(SqliteStore::new(pool));
            let worker = SyncWorker::new(store, Arc::new(HttpTransport::new()))
                .with_credentials(&cfg.sync.username, &cfg.sync.password);
            let interval = Duration::from_millis(interval_ms.unwrap_or(cfg.sync.interval_ms));

            let cancel = CancelToken::new();
            let ctrlc = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrlc.cancel();
                }
            });

            if !worker.start(interval, &cancel).await? {
                println!("Sync is not configured or inactive; nothing to do.");
            }
        }
        Commands::Status => {
            let pool = db::connect(&cfg.db.path).await?;
            let store = SqliteStore::new(pool);
            match store.sync_cursor().await? {
                Some(last_sync) => {
                    let when = chrono::DateTime::from_timestamp_millis(last_sync)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "invalid timestamp".to_string());
                    println!("Watermark: {last_sync} ({when})");
                }
                None => println!("Watermark: not initialized"),
            }
            match store.sync_settings().await? {
                Some(settings) => {
                    println!("Target:    {}", settings.url);
                    println!("Active:    {}", settings.active);
                }
                None => println!("Target:    not configured"),
            }
        }
    }

    Ok(())
}
