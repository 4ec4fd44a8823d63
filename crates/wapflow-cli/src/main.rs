//! wapflow CLI - Write-Audit-Publish ingestion into a branch-capable lakehouse.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wapflow_core::config::LogFormat;
use wapflow_core::Config;

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution (batch published)
    Success = 0,
    /// Configuration error (invalid config file, bad arguments)
    ConfigError = 1,
    /// The audit rejected the batch
    Rejected = 2,
    /// The run aborted before publishing
    Aborted = 3,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code.
    fn from_error(error: &anyhow::Error) -> Self {
        use wapflow_core::{Error, LakehouseError};

        let is_config = error.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<Error>(),
                Some(Error::Config(_)) | Some(Error::Source(_))
            ) || matches!(
                cause.downcast_ref::<LakehouseError>(),
                Some(LakehouseError::InvalidName(_)) | Some(LakehouseError::TableNotFound { .. })
            )
        });

        if is_config {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "wapflow")]
#[command(about = "Write-Audit-Publish ingestion CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage, audit and publish one batch
    Run {
        /// Destination table
        #[arg(long)]
        table: String,

        /// Staging branch name (generated when omitted)
        #[arg(long)]
        branch: Option<String>,

        /// Batch file or directory of .jsonl/.json files
        #[arg(long)]
        source: PathBuf,
    },

    /// List lakehouse branches
    Branches,

    /// Show row count and fingerprint of a table
    Inspect {
        /// Table to inspect
        #[arg(long)]
        table: String,

        /// Branch to read (defaults to the main branch)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Discard staging branches leaked by crashed or failed runs
    Sweep,

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses, defaults otherwise
    let monitoring = config_path(&cli.config)
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_str()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            table,
            branch,
            source,
        } => commands::run::run(config, &table, branch.as_deref(), &source).await,

        Commands::Branches => {
            commands::branches::run(config).await?;
            Ok(ExitCode::Success)
        }

        Commands::Inspect { table, branch } => {
            commands::inspect::run(config, &table, branch.as_deref()).await?;
            Ok(ExitCode::Success)
        }

        Commands::Sweep => commands::sweep::run(config).await,

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
            Ok(ExitCode::Success)
        }
    }
}

const DEFAULT_CONFIG: &str = "wapflow.toml";

/// Explicit `--config`, or `wapflow.toml` when it exists.
fn config_path(path: &Option<PathBuf>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.clone()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            default.exists().then_some(default)
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match config_path(path) {
        Some(path) => Ok(Config::from_file(&path)?),
        None => {
            tracing::debug!("No configuration file, using defaults");
            Ok(Config::default())
        }
    }
}
