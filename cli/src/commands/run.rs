// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `vela run`: host the controllers until Ctrl+C or SIGTERM.
//!
//! Standby replicas wait for the leader lease and run no reconcilers
//! until they hold it.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vela_core::application::leadership::LeaderElection;
use vela_core::application::ControllerManager;
use vela_core::domain::controller_config::ControllerConfig;
use vela_core::domain::template::ModelTemplate;
use vela_core::domain::version::ModelTemplateVersion;
use vela_core::infrastructure::event_bus::{EventBus, EventBusError};
use vela_core::infrastructure::leader::InMemoryLeaderElector;
use vela_core::infrastructure::manifest_loader::ResourceManifests;
use vela_core::infrastructure::store::InMemoryResourceStore;

use crate::telemetry;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Multi-document YAML of ModelTemplate and ModelTemplateVersion objects to seed
    #[arg(long, value_name = "FILE")]
    pub manifests: Option<PathBuf>,

    /// Leader election identity (default: hostname and process id)
    #[arg(long, env = "VELA_INSTANCE_ID")]
    pub instance_id: Option<String>,
}

pub async fn execute(args: RunArgs, config: ControllerConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    telemetry::install_metrics_exporter(config.spec.observability.metrics.as_ref())?;

    let templates = Arc::new(InMemoryResourceStore::<ModelTemplate>::new());
    let versions = Arc::new(InMemoryResourceStore::<ModelTemplateVersion>::new());
    if let Some(path) = &args.manifests {
        seed(path, templates.as_ref(), versions.as_ref()).await?;
    }

    let event_bus = Arc::new(EventBus::with_default_capacity());
    let manager = ControllerManager::from_config(templates, versions, event_bus.clone(), &config);

    let shutdown = CancellationToken::new();
    let event_logger = spawn_event_logger(&event_bus, shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let election = &config.spec.leader_election;
    let result = if election.enabled {
        let instance_id = args.instance_id.unwrap_or_else(default_instance_id);
        let elector = Arc::new(InMemoryLeaderElector::new(election.lease_duration()));
        let leadership = LeaderElection::from_config(elector, election, instance_id);
        info!(
            release = %config.spec.controller.release_name,
            instance = %leadership.instance_id(),
            "Waiting for leadership"
        );
        leadership
            .run_while_leader(shutdown.clone(), |leading| run_controllers(&manager, leading))
            .await
    } else {
        info!("Leader election disabled");
        run_controllers(&manager, shutdown.clone()).await
    };

    shutdown.cancel();
    if let Err(e) = event_logger.await {
        warn!(error = %e, "Event logger task failed");
    }
    result
}

pub(crate) async fn seed(
    path: &Path,
    templates: &InMemoryResourceStore<ModelTemplate>,
    versions: &InMemoryResourceStore<ModelTemplateVersion>,
) -> Result<()> {
    let manifests = ResourceManifests::from_yaml_file(path)?;
    manifests.apply(templates, versions).await?;
    info!(path = %path.display(), objects = manifests.len(), "Seeded resource manifests");
    Ok(())
}

async fn run_controllers(manager: &ControllerManager, shutdown: CancellationToken) -> Result<()> {
    let running = manager.start(shutdown.clone()).await?;
    info!("Controllers running");

    shutdown.cancelled().await;
    running.join().await;
    info!("Controllers stopped");
    Ok(())
}

/// Log every controller event as JSON at debug level.
fn spawn_event_logger(event_bus: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!(object = %event.object(), event = %json, "Controller event")
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize controller event"),
                    },
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }
    })
}

fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "vela".to_string());
    format!("{}-{}", host, std::process::id())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_instance_id_carries_pid() {
        let id = default_instance_id();
        assert!(id.ends_with(&format!("-{}", std::process::id())));
    }
}
