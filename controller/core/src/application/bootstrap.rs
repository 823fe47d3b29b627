// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Controller Manager
//!
//! Wires the ledger, handlers and per-kind controllers together:
//!
//! 1. Rebuild the version ledger from every persisted version. Failure is
//!    fatal ([`BootstrapError::LedgerRebuild`]).
//! 2. Register the template handlers (default version, latest version,
//!    ledger cleanup) and the version handlers (assignment, serving config).
//! 3. Start the workers. No worker runs before step 1 completed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::ledger::VersionLedger;
use crate::application::serving_config::VersionConfigHandler;
use crate::application::template_cleanup::LedgerCleanup;
use crate::application::template_reconciler::{DefaultVersionResolver, LatestVersionSync};
use crate::application::version_reconciler::VersionReconciler;
use crate::domain::controller_config::ControllerConfig;
use crate::domain::serving::ConfigGenerator;
use crate::domain::store::{LabelSelector, ResourceStore, StoreError};
use crate::domain::template::ModelTemplate;
use crate::domain::version::ModelTemplateVersion;
use crate::infrastructure::controller::Controller;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::serving_config::RayLlmConfigGenerator;
use crate::infrastructure::work_queue::{RetryPolicy, WorkQueue};

pub const TEMPLATE_CONTROLLER: &str = "model-template";
pub const VERSION_CONTROLLER: &str = "model-template-version";

pub const HANDLER_SET_DEFAULT_VERSION: &str = "templateController.setDefaultVersion";
pub const HANDLER_SYNC_LATEST_VERSION: &str = "templateController.syncLatestVersion";
pub const HANDLER_DELETE_LATEST_VERSION: &str = "templateController.deleteLatestVersion";
pub const HANDLER_ASSIGN_VERSION: &str = "templateController.assignVersion";
pub const HANDLER_CONFIG_DEPLOYMENT: &str = "modelTemplateVersion.configModelDeployment";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to rebuild version ledger: {0}")]
    LedgerRebuild(#[source] StoreError),

    #[error("Failed to start {controller} controller: {source}")]
    ControllerStart {
        controller: &'static str,
        #[source]
        source: StoreError,
    },
}

pub struct ControllerManager {
    templates: Arc<dyn ResourceStore<ModelTemplate>>,
    versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
    ledger: Arc<VersionLedger>,
    generator: Arc<dyn ConfigGenerator>,
    event_bus: Arc<EventBus>,
    workers: usize,
    retry: RetryPolicy,
}

impl ControllerManager {
    pub fn new(
        templates: Arc<dyn ResourceStore<ModelTemplate>>,
        versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            templates,
            versions,
            ledger: Arc::new(VersionLedger::new()),
            generator: Arc::new(RayLlmConfigGenerator::new()),
            event_bus,
            workers: 2,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        templates: Arc<dyn ResourceStore<ModelTemplate>>,
        versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
        event_bus: Arc<EventBus>,
        config: &ControllerConfig,
    ) -> Self {
        Self::new(templates, versions, event_bus)
            .with_workers(config.spec.controller.workers)
            .with_retry(RetryPolicy::from(&config.spec.retry))
    }

    /// Worker tasks per controller
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ConfigGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn ledger(&self) -> Arc<VersionLedger> {
        Arc::clone(&self.ledger)
    }

    pub async fn rebuild_ledger(&self) -> Result<usize, BootstrapError> {
        let versions = self
            .versions
            .list(None, &LabelSelector::everything())
            .await
            .map_err(BootstrapError::LedgerRebuild)?;
        let entries = self.ledger.rebuild(&versions);
        info!(versions = versions.len(), entries, "Rebuilt version ledger");
        Ok(entries)
    }

    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) -> Result<RunningControllers, BootstrapError> {
        self.rebuild_ledger().await?;

        let mut templates =
            Controller::new(TEMPLATE_CONTROLLER, self.templates.clone(), self.retry);
        templates.on_change(
            HANDLER_SET_DEFAULT_VERSION,
            Arc::new(DefaultVersionResolver::new(
                self.templates.clone(),
                self.versions.clone(),
                self.event_bus.clone(),
            )),
        );
        templates.on_change(
            HANDLER_SYNC_LATEST_VERSION,
            Arc::new(LatestVersionSync::new(
                self.templates.clone(),
                self.ledger.clone(),
                self.event_bus.clone(),
            )),
        );
        templates.on_remove(
            HANDLER_DELETE_LATEST_VERSION,
            Arc::new(LedgerCleanup::new(self.ledger.clone(), self.event_bus.clone())),
        );
        let template_queue = templates.queue();

        let mut versions =
            Controller::new(VERSION_CONTROLLER, self.versions.clone(), self.retry);
        versions.on_change(
            HANDLER_ASSIGN_VERSION,
            Arc::new(VersionReconciler::new(
                self.versions.clone(),
                self.templates.clone(),
                self.ledger.clone(),
                template_queue.clone(),
                self.event_bus.clone(),
            )),
        );
        versions.on_change(
            HANDLER_CONFIG_DEPLOYMENT,
            Arc::new(VersionConfigHandler::new(
                self.versions.clone(),
                self.generator.clone(),
                self.event_bus.clone(),
            )),
        );
        let version_queue = versions.queue();

        let mut handles = templates
            .start(self.workers, shutdown.clone())
            .await
            .map_err(|source| BootstrapError::ControllerStart {
                controller: TEMPLATE_CONTROLLER,
                source,
            })?;
        handles.extend(
            versions
                .start(self.workers, shutdown.clone())
                .await
                .map_err(|source| BootstrapError::ControllerStart {
                    controller: VERSION_CONTROLLER,
                    source,
                })?,
        );

        info!(workers = self.workers, "Model template controllers started");
        Ok(RunningControllers {
            template_queue,
            version_queue,
            handles,
        })
    }
}

/// Handle on started controllers.
pub struct RunningControllers {
    template_queue: Arc<WorkQueue>,
    version_queue: Arc<WorkQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningControllers {
    pub fn template_queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.template_queue)
    }

    pub fn version_queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.version_queue)
    }

    pub fn is_idle(&self) -> bool {
        self.template_queue.is_idle() && self.version_queue.is_idle()
    }

    /// Wait until both queues have stayed idle for `settle`. Returns `false`
    /// if that did not happen within `timeout`.
    pub async fn wait_idle(&self, settle: Duration, timeout: Duration) -> bool {
        let poll = Duration::from_millis(10).min(settle);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut idle_since: Option<tokio::time::Instant> = None;

        while tokio::time::Instant::now() < deadline {
            if self.is_idle() {
                let since = *idle_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= settle {
                    return true;
                }
            } else {
                idle_since = None;
            }
            tokio::time::sleep(poll).await;
        }
        false
    }

    /// Wait for every controller task to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Controller task panicked");
            }
        }
    }
}
