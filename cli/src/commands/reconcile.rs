// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `vela reconcile`: one-shot reconciliation of a manifest file.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vela_core::application::ControllerManager;
use vela_core::domain::condition::{ConditionType, Conditioned};
use vela_core::domain::controller_config::ControllerConfig;
use vela_core::domain::meta::Resource;
use vela_core::domain::store::{LabelSelector, ResourceStore};
use vela_core::domain::template::ModelTemplate;
use vela_core::domain::version::ModelTemplateVersion;
use vela_core::infrastructure::event_bus::EventBus;
use vela_core::infrastructure::store::InMemoryResourceStore;

use super::run::seed;

/// Quiet period after which the queues count as drained
const SETTLE_WINDOW: Duration = Duration::from_millis(200);

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Multi-document YAML of ModelTemplate and ModelTemplateVersion objects
    #[arg(long, value_name = "FILE")]
    pub manifests: PathBuf,

    /// Give up when the controllers are still busy after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

pub async fn execute(args: ReconcileArgs, config: ControllerConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let templates = Arc::new(InMemoryResourceStore::<ModelTemplate>::new());
    let versions = Arc::new(InMemoryResourceStore::<ModelTemplateVersion>::new());
    seed(&args.manifests, templates.as_ref(), versions.as_ref()).await?;

    let event_bus = Arc::new(EventBus::with_default_capacity());
    let manager =
        ControllerManager::from_config(templates.clone(), versions.clone(), event_bus, &config);

    let shutdown = CancellationToken::new();
    let running = manager.start(shutdown.clone()).await?;
    let settled = running
        .wait_idle(SETTLE_WINDOW, Duration::from_secs(args.timeout_secs))
        .await;
    shutdown.cancel();
    running.join().await;

    print_report(templates.as_ref(), versions.as_ref()).await?;

    if !settled {
        anyhow::bail!("Controllers did not settle within {}s", args.timeout_secs);
    }
    println!();
    println!("{}", "✓ Reconciled".green());
    Ok(())
}

async fn print_report(
    templates: &dyn ResourceStore<ModelTemplate>,
    versions: &dyn ResourceStore<ModelTemplateVersion>,
) -> Result<()> {
    let everything = LabelSelector::everything();

    println!("{}", "ModelTemplates:".bold());
    for template in templates.list(None, &everything).await? {
        let resolved = if template.is_default_version_resolved() {
            "resolved".green()
        } else {
            "unresolved".yellow()
        };
        println!("  {} ({})", template_line(&template), resolved);
        if let Some(condition) = template.condition(ConditionType::DefaultVersionResolved) {
            if !condition.message.is_empty() {
                println!("    {}", condition.message.dimmed());
            }
        }
    }
    println!();

    println!("{}", "ModelTemplateVersions:".bold());
    for version in versions.list(None, &everything).await? {
        let configured = if version.is_condition_true(ConditionType::Configured) {
            "configured".green()
        } else {
            "not configured".yellow()
        };
        println!("  {} ({})", version_line(&version), configured);
        if let Some(condition) = version.condition(ConditionType::Configured) {
            if !condition.message.is_empty() {
                println!("    {}", condition.message.dimmed());
            }
        }
    }
    Ok(())
}

fn template_line(template: &ModelTemplate) -> String {
    format!(
        "{} default={} latest={} ref={}",
        template.key(),
        template.status.default_version,
        template.status.latest_version,
        template.spec.default_version_ref.as_deref().unwrap_or("-"),
    )
}

fn version_line(version: &ModelTemplateVersion) -> String {
    let number = version
        .assigned_version()
        .map(|number| number.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} template={} version={}",
        version.key(),
        version.spec.template_name,
        number
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines() {
        let mut template = ModelTemplate::new("default", "llama");
        template.status.default_version = 1;
        template.status.latest_version = 2;
        assert_eq!(template_line(&template), "default/llama default=1 latest=2 ref=-");

        let mut version = ModelTemplateVersion::new("default", "v2", "llama");
        assert_eq!(version_line(&version), "default/v2 template=llama version=-");

        version.status.version = 2;
        version.set_condition(ConditionType::Assigned, true, "", "");
        assert_eq!(version_line(&version), "default/v2 template=llama version=2");
    }
}
