// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use vela_core::domain::controller_config::ControllerConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the resolved manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./vela-config.yaml)
        #[arg(short, long, default_value = "./vela-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = ControllerConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. VELA_CONFIG_PATH: {}",
            std::env::var("VELA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./vela-config.yaml");
        println!("  4. ~/.vela/config.yaml");
        println!("  5. /etc/vela/config.yaml");
        println!();
    }

    if as_yaml {
        let rendered = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Controllers:".bold());
    println!("  Release: {}", spec.controller.release_name);
    println!("  Workers per controller: {}", spec.controller.workers);
    println!();

    println!("{}", "Retry backoff:".bold());
    println!("  Base delay: {:?}", spec.retry.base_delay());
    println!("  Max delay: {:?}", spec.retry.max_delay());
    println!();

    println!("{}", "Leader election:".bold());
    if spec.leader_election.enabled {
        println!("  Lock: {}", spec.leader_election.lock_name);
        println!("  Lease duration: {:?}", spec.leader_election.lease_duration());
        println!("  Renew period: {:?}", spec.leader_election.renew_period());
        println!("  Retry period: {:?}", spec.leader_election.retry_period());
    } else {
        println!("  {}", "(disabled)".dimmed());
    }
    println!();

    println!("{}", "Observability:".bold());
    println!("  Log level: {}", spec.observability.log_level);
    println!("  Log format: {:?}", spec.observability.log_format);
    match &spec.observability.metrics {
        Some(metrics) if metrics.enabled => println!("  Metrics: port {}", metrics.port),
        _ => println!("  Metrics: {}", "(disabled)".dimmed()),
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config =
        ControllerConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    ControllerConfig::default().to_yaml_file(&output)?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
