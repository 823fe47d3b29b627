// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Version Reconciler
//!
//! Drives a `ModelTemplateVersion` through `Unlinked -> Linked -> Assigned`:
//!
//! 1. Deleting or already assigned: no-op.
//! 2. Owning template missing: `NotFound`, retried.
//! 3. Label or owner reference missing: write both in one update and stop.
//!    That write redelivers the version.
//! 4. Under the template key's assignment lock: persist `ledger + 1` with
//!    `Assigned=true`, then advance the ledger and enqueue the template.
//!
//! Store conflicts propagate; the next delivery starts over from a fresh read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::application::ledger::VersionLedger;
use crate::application::reconcile::{ChangeHandler, ReconcileError, ReconcileOutcome};
use crate::domain::condition::{ConditionType, Conditioned};
use crate::domain::events::VersionEvent;
use crate::domain::meta::{ObjectKey, Resource, LABEL_MODEL_TEMPLATE_NAME};
use crate::domain::store::{Enqueue, ResourceStore};
use crate::domain::template::ModelTemplate;
use crate::domain::version::ModelTemplateVersion;
use crate::infrastructure::event_bus::EventBus;

pub struct VersionReconciler {
    versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
    templates: Arc<dyn ResourceStore<ModelTemplate>>,
    ledger: Arc<VersionLedger>,
    template_queue: Arc<dyn Enqueue>,
    event_bus: Arc<EventBus>,
}

impl VersionReconciler {
    pub fn new(
        versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
        templates: Arc<dyn ResourceStore<ModelTemplate>>,
        ledger: Arc<VersionLedger>,
        template_queue: Arc<dyn Enqueue>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            versions,
            templates,
            ledger,
            template_queue,
            event_bus,
        }
    }

    async fn link(
        &self,
        version: &ModelTemplateVersion,
        template: &ModelTemplate,
    ) -> Result<ReconcileOutcome<ModelTemplateVersion>, ReconcileError> {
        let owner = template.owner_reference().ok_or_else(|| {
            ReconcileError::ValidationFailed(format!(
                "{} {} has no uid",
                ModelTemplate::KIND,
                template.key()
            ))
        })?;

        let mut linked = version.clone();
        linked
            .metadata
            .labels
            .insert(LABEL_MODEL_TEMPLATE_NAME.to_string(), template.metadata.name.clone());
        // Replace a reference left behind by an earlier template of the same name
        linked.metadata.owner_references.retain(|r| {
            !(r.kind == ModelTemplate::KIND && r.name == owner.name && r.uid != owner.uid)
        });
        if !linked.is_owned_by(template) {
            linked.metadata.owner_references.push(owner);
        }

        let persisted = self.versions.update(&linked).await?;
        debug!(version = %version.key(), template = %template.key(), "Linked version to template");

        self.event_bus.publish_version_event(VersionEvent::VersionLinked {
            version: version.key(),
            template: template.key(),
            linked_at: Utc::now(),
        });
        Ok(ReconcileOutcome::Updated(persisted))
    }

    async fn assign(
        &self,
        version: &ModelTemplateVersion,
        template: &ModelTemplate,
    ) -> Result<ReconcileOutcome<ModelTemplateVersion>, ReconcileError> {
        let template_key = template.key();
        let owner = template.metadata.uid;
        let guard = self.ledger.lock_assignment(&template_key).await;

        let next = self.ledger.get_for(&template_key, owner) + 1;
        let mut assigned = version.clone();
        assigned.status.version = next;
        assigned.set_condition(ConditionType::Assigned, true, "", "");
        let persisted = self.versions.update_status(&assigned).await?;

        let advanced = self.ledger.increment_for(&template_key, owner);
        drop(guard);

        if advanced != next {
            warn!(
                template = %template_key,
                assigned = next,
                ledger = advanced,
                "Version ledger advanced past the assigned number"
            );
        }

        metrics::counter!("vela_versions_assigned_total").increment(1);
        info!(
            version = %version.key(),
            template = %template_key,
            number = next,
            "Assigned version number"
        );

        self.template_queue.enqueue(template_key.clone());
        self.event_bus.publish_version_event(VersionEvent::VersionAssigned {
            version: version.key(),
            template: template_key,
            number: next,
            assigned_at: Utc::now(),
        });
        Ok(ReconcileOutcome::Updated(persisted))
    }
}

#[async_trait]
impl ChangeHandler<ModelTemplateVersion> for VersionReconciler {
    async fn on_change(
        &self,
        key: &ObjectKey,
        version: &ModelTemplateVersion,
    ) -> Result<ReconcileOutcome<ModelTemplateVersion>, ReconcileError> {
        if version.metadata.is_deleting() || version.is_assigned() {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let template_key = version.template_key();
        let template = self
            .templates
            .get(&template_key.namespace, &template_key.name)
            .await?
            .ok_or_else(|| ReconcileError::NotFound {
                kind: ModelTemplate::KIND,
                key: template_key.clone(),
            })?;

        if !version.is_linked_to(&template) {
            return self.link(version, &template).await;
        }

        debug!(version = %key, template = %template_key, "Assigning version number");
        self.assign(version, &template).await
    }
}
