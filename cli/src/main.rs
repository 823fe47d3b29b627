// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Vela Controller CLI
//!
//! The `vela` binary hosts the model template controllers.
//!
//! ## Commands
//!
//! - `vela run` - Run the controllers under leader election until stopped
//! - `vela reconcile` - Seed manifests, reconcile until idle and print the result
//! - `vela config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use vela_controller::commands::{self, ConfigCommand, ReconcileArgs, RunArgs};
use vela_core::domain::controller_config::{ControllerConfig, LogFormat};

/// Vela - Model template version controller
#[derive(Parser)]
#[command(name = "vela")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "VELA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file value
    #[arg(long, global = true, env = "VELA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (text, json). Defaults to the config file value
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controllers until Ctrl+C or SIGTERM
    #[command(name = "run")]
    Run(RunArgs),

    /// Reconcile a manifest file until the controllers are idle
    #[command(name = "reconcile")]
    Reconcile(ReconcileArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself; logging falls
    // back to defaults so `config validate` can still run
    let loaded = ControllerConfig::load_or_default(cli.config.clone());
    let observability = loaded
        .as_ref()
        .map(|config| config.spec.observability.clone())
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(observability.log_level);
    let format = match &cli.log_format {
        Some(format) => format.parse::<LogFormat>()?,
        None => observability.log_format,
    };
    init_logging(&level, format)?;

    match cli.command {
        Some(Commands::Run(args)) => {
            let config = loaded.context("Failed to load configuration")?;
            commands::run::execute(args, config).await
        }
        Some(Commands::Reconcile(args)) => {
            let config = loaded.context("Failed to load configuration")?;
            commands::reconcile::execute(args, config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
