//! bazsync CLI - incremental jdeps sync for JVM build graphs
//!
//! Drives sync passes over a serialized build graph and inspects the
//! resulting entity store.
//!
//! # Usage
//!
//! ```bash
//! # Sync a graph snapshot exported by the build frontend
//! bazsync sync --graph graph.json
//!
//! # Inspect what a target ended up with
//! bazsync show //java/com/example:lib
//!
//! # Store statistics
//! bazsync status --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use bazsync_config::{ConfigOverrides, LogFormat, LoggingConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod progress;

/// bazsync - Incremental jdeps pruning for JVM build graph sync
#[derive(Parser, Debug)]
#[command(name = "bazsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Workspace root (defaults to the current directory)
    #[arg(long, short = 'w', global = true, env = "BAZSYNC_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to configuration file (replaces <workspace>/.bazsync/config.toml)
    #[arg(long, short = 'c', global = true, env = "BAZSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Override the bazsync data directory
    #[arg(long, global = true, env = "BAZSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,
}

/// `--log-format` values
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl GlobalOptions {
    /// Convert global options to config overrides
    fn to_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            data_dir: self.data_dir.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.map(LogFormat::from),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync pass over a build graph snapshot
    Sync(commands::sync::SyncArgs),

    /// Show store statistics and the last sync state
    Status(commands::status::StatusArgs),

    /// Show the stored module, extra deps and resolved jdeps of a target
    Show(commands::show::ShowArgs),

    /// Remove the bazsync data directory
    Clean(commands::clean::CleanArgs),

    /// View and initialise configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

/// Level from the command line, else from configuration
fn log_level(global: &GlobalOptions, logging: &LoggingConfig) -> Level {
    if global.quiet {
        Level::ERROR
    } else if global.verbose {
        Level::DEBUG
    } else {
        logging.level.parse().unwrap_or(Level::INFO)
    }
}

fn init_tracing(global: &GlobalOptions) -> Result<()> {
    // Best effort: a broken config is reported by the command itself
    let logging = commands::resolve_workspace(global)
        .ok()
        .and_then(|ws| commands::load_config(global, &ws, None).ok())
        .map(|config| config.logging)
        .unwrap_or_default();
    let level = log_level(global, &logging);

    match logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.global)?;

    match cli.command {
        Commands::Sync(args) => commands::sync::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Show(args) => commands::show::execute(args, cli.global).await,
        Commands::Clean(args) => commands::clean::execute(args, cli.global).await,
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global).await,
    }
}
