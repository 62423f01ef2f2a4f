//! # Activity Harness CLI (`act`)
//!
//! The `act` binary drives the ingestion daemon: database setup,
//! continuous or one-shot polling runs, and per-source health listings.
//!
//! ## Usage
//!
//! ```bash
//! act --config ./config/act.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `act init` | Create the SQLite database and schema |
//! | `act init-config` | Write a commented example configuration file |
//! | `act sources` | List configured sources and their health status |
//! | `act run` | Poll all sources continuously until interrupted |
//! | `act run --once` | Run exactly one ingestion cycle and exit |
//!
//! ## Examples
//!
//! ```bash
//! # First-time setup
//! act init-config --config ./config/act.toml
//! act init --config ./config/act.toml
//!
//! # Single cycle with a machine-readable summary
//! act run --once --json-summary --config ./config/act.toml
//!
//! # Discard checkpoints and re-read everything
//! act run --once --reset-state --config ./config/act.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

use activity_harness::config::{self, load_config};
use activity_harness::daemon::{print_run_summary, print_run_summary_json, Daemon};
use activity_harness::hooks::PluginSet;
use activity_harness::store::build_store;

/// Activity Harness CLI — a local-first activity ingestion daemon for
/// personal data streams.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. Run `act init-config` to generate one.
#[derive(Parser)]
#[command(
    name = "act",
    about = "Activity Harness — a local-first activity ingestion daemon for personal data streams",
    version,
    long_about = "Activity Harness polls heterogeneous sources (dropped log files, incrementally \
    trawled directories, external message databases), normalizes their records into \
    content-addressed events, groups them into sessions, and persists everything to SQLite \
    with durable per-source checkpoints."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/act.toml`. All source, store, and daemon
    /// settings are read from this file.
    #[arg(long, global = true, default_value = "./config/act.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (events, sessions, source_status, ingest_audit). Idempotent.
    Init,

    /// Write a commented example configuration file.
    ///
    /// Writes to the path given by `--config`. Refuses to overwrite an
    /// existing file unless `--force` is passed.
    InitConfig {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// List configured sources and their health status.
    ///
    /// Shows the last poll outcome per source; sources that have never
    /// been polled are listed as `never-run`.
    Sources,

    /// Poll all sources and ingest new activity.
    ///
    /// Without flags this runs continuously, sleeping between idle
    /// cycles, until interrupted. A source failure is recorded in that
    /// source's status and never stops the other sources.
    Run {
        /// Run exactly one cycle across all sources, then exit.
        #[arg(long)]
        once: bool,

        /// Discard persisted checkpoints and re-read all sources from
        /// the beginning. Stored events deduplicate, so this is safe.
        #[arg(long)]
        reset_state: bool,

        /// Print the end-of-run summary as JSON instead of a table.
        #[arg(long)]
        json_summary: bool,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs on stderr; stdout is reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init-config runs before any config exists.
    if let Commands::InitConfig { force } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        if cli.config.exists() && !force {
            anyhow::bail!(
                "refusing to overwrite {} (pass --force to replace it)",
                cli.config.display()
            );
        }
        if let Some(parent) = cli.config.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&cli.config, config::example_toml())?;
        println!("Wrote example configuration to {}", cli.config.display());
        return Ok(());
    }

    let cfg = load_config(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.logging.level.clone());
    init_logging(&level);

    match cli.command {
        Commands::Init => {
            let store = build_store(&cfg.store).await?;
            store.init_schema().await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            let store = build_store(&cfg.store).await?;
            let daemon = Daemon::new(cfg, store, &PluginSet::new(), false)?;
            daemon.print_source_status().await?;
        }
        Commands::Run {
            once,
            reset_state,
            json_summary,
        } => {
            let store = build_store(&cfg.store).await?;
            let mut daemon = Daemon::new(cfg, store, &PluginSet::new(), reset_state)?;

            let stop = daemon.stop_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.store(true, Ordering::Relaxed);
                }
            });

            let summary = daemon.run(once).await?;
            if json_summary {
                print_run_summary_json(&summary)?;
            } else {
                print_run_summary(&summary);
            }
        }
        Commands::InitConfig { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
