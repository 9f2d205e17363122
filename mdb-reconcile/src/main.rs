//! mdb-reconcile - Mother DB reconciliation CLI
//!
//! **Usage:**
//! ```bash
//! mdb-reconcile quick-setup --equipment EQ-01 run1.json run2.json
//! mdb-reconcile analyze --equipment EQ-01 run1.json
//! mdb-reconcile status --equipment EQ-01
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr (or the file named
//! in `[logging].file`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdb_common::config::{resolve_config_path, LoggingConfig, CONFIG_ENV_VAR};
use mdb_reconcile::db::init_database_pool;
use mdb_reconcile::{JsonParameterSource, MotherDbManager, ParameterSource, SqliteStore, TomlConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reconcile equipment parameter files against the Mother DB
#[derive(Parser, Debug)]
#[command(name = "mdb-reconcile", version)]
#[command(about = "Reconcile measured equipment parameters against the Mother DB")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "MDB_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite Mother DB file (overrides `database_path` from the config file)
    #[arg(long, global = true, env = "MDB_DATABASE", value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, analyze and commit every auto-acceptable parameter
    QuickSetup {
        /// Equipment the files belong to
        #[arg(long)]
        equipment: String,

        /// Restrict to these source file names (repeatable; default all)
        #[arg(long = "only-file", value_name = "NAME")]
        only_files: Vec<String>,

        /// JSON parameter files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Load and analyze without writing (dry run)
    Analyze {
        #[arg(long)]
        equipment: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show stored parameter counts and confidence
    Status {
        #[arg(long)]
        equipment: String,
    },
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref(), CONFIG_ENV_VAR);
    let config = TomlConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("Starting mdb-reconcile {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let db_path = cli.database.clone().unwrap_or_else(|| config.database_path.clone());
    info!("Database: {}", db_path.display());
    let pool = init_database_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open Mother DB {}", db_path.display()))?;
    let store = Arc::new(SqliteStore::new(pool));

    let manager = MotherDbManager::new(config.reconcile.clone(), store)
        .context("Invalid reconcile configuration")?;
    let source = JsonParameterSource::new();

    match cli.command {
        Command::QuickSetup {
            equipment,
            only_files,
            files,
        } => {
            let incoming = source
                .load(&files, &equipment)
                .context("Failed to load parameter files")?;
            let result = manager
                .quick_setup_mother_db(incoming, &only_files, &equipment)
                .await
                .context("Quick setup failed")?;
            print_json(&result)?;

            if !result.failed.is_empty() {
                warn!(
                    failed = result.failed.len(),
                    "Some records were not committed"
                );
                return Ok(ExitCode::from(2));
            }
        }
        Command::Analyze { equipment, files } => {
            let mut session = manager
                .load_from(&source, &files, &equipment)
                .await
                .context("Failed to load parameter files")?;
            let report = manager
                .analyze(&mut session)
                .await
                .context("Analysis failed")?;
            print_json(&report)?;
            manager.abort(&mut session, "dry run").await?;
        }
        Command::Status { equipment } => {
            let status = manager
                .status(&equipment)
                .await
                .context("Failed to read Mother DB status")?;
            print_json(&status)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
