//! Config command - View and initialise configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bazsync_config::{BazsyncConfig, ConfigLoader};
use clap::Subcommand;
use serde::Serialize;

use super::{config_loader, load_config, print_info, resolve_workspace};
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration and the files it is read from
    Show(ShowArgs),

    /// Write a default `.bazsync/config.toml` unless one exists
    Init(InitArgs),
}

/// Arguments for `config show`
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Show only the global (`~/.bazsync/config.toml`) configuration
    #[arg(long)]
    global: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Arguments for `config init`
#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Initialise `~/.bazsync/config.toml` instead of the workspace config
    #[arg(long)]
    global: bool,
}

#[derive(Debug, Serialize)]
struct ConfigPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    global: Option<PathBuf>,
    local: PathBuf,
}

/// Execute a config subcommand
pub async fn execute(cmd: ConfigCommand, global: GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) if args.global => show_global(args, &global),
        ConfigCommand::Show(args) => show(args, &global),
        ConfigCommand::Init(args) if args.global => init_global(&global),
        ConfigCommand::Init(_) => init(&global),
    }
}

fn show_global(args: ShowArgs, global: &GlobalOptions) -> Result<()> {
    let mut loader = ConfigLoader::new();
    let path = loader.global_config_path();
    let config = loader
        .load_global()
        .context("Failed to load global configuration")?;

    if args.json {
        let output = serde_json::json!({
            "path": path,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match (path, config) {
        (Some(path), Some(config)) => {
            println!("# global: {}", path.display());
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
        (Some(path), None) => print_info(
            &format!("No global configuration at {}", path.display()),
            global.quiet,
        ),
        (None, _) => print_info(
            "No home directory; global configuration unavailable",
            global.quiet,
        ),
    }
    Ok(())
}

fn show(args: ShowArgs, global: &GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(global)?;
    let config = load_config(global, &workspace, None)?;
    let loader = config_loader(global)?;
    let paths = ConfigPaths {
        global: loader.global_config_path(),
        local: loader.local_config_path(&workspace),
    };

    if args.json {
        let output = serde_json::json!({
            "paths": paths,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(ref path) = paths.global {
        println!("# global: {}", path.display());
    }
    println!("# local:  {}", paths.local.display());
    println!();
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );
    Ok(())
}

fn init(global: &GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(global)?;
    // `--config` may name a file that does not exist yet
    let loader = match global.config {
        Some(ref path) => ConfigLoader::new().with_config_file(path),
        None => ConfigLoader::new(),
    };
    let existed = loader.local_config_path(&workspace).exists();
    let path = loader
        .init_local(&workspace)
        .context("Failed to initialise configuration")?;

    report_init(&path, existed, global.quiet);
    Ok(())
}

fn init_global(global: &GlobalOptions) -> Result<()> {
    let loader = ConfigLoader::new();
    let path = loader
        .global_config_path()
        .context("No home directory for the global configuration")?;
    let existed = path.exists();
    if !existed {
        loader
            .save_global(&BazsyncConfig::default())
            .context("Failed to initialise global configuration")?;
    }

    report_init(&path, existed, global.quiet);
    Ok(())
}

fn report_init(path: &Path, existed: bool, quiet: bool) {
    if existed {
        print_info(&format!("Config already exists: {}", path.display()), quiet);
    } else {
        print_info(&format!("Created {}", path.display()), quiet);
    }
}
