// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::application::ledger::VersionLedger;
use crate::application::reconcile::{ReconcileError, RemoveHandler};
use crate::domain::events::TemplateEvent;
use crate::domain::meta::ObjectKey;
use crate::domain::template::ModelTemplate;
use crate::infrastructure::event_bus::EventBus;

/// Drops the ledger entry of a deleted template, so a template recreated
/// under the same name numbers its versions from 1 again. An entry that the
/// recreated template already counts in is left alone.
pub struct LedgerCleanup {
    ledger: Arc<VersionLedger>,
    event_bus: Arc<EventBus>,
}

impl LedgerCleanup {
    pub fn new(ledger: Arc<VersionLedger>, event_bus: Arc<EventBus>) -> Self {
        Self { ledger, event_bus }
    }
}

#[async_trait]
impl RemoveHandler<ModelTemplate> for LedgerCleanup {
    async fn on_remove(
        &self,
        key: &ObjectKey,
        template: &ModelTemplate,
    ) -> Result<(), ReconcileError> {
        if !self.ledger.delete_for(key, template.metadata.uid) {
            debug!(template = %key, "No ledger entry of this template to remove");
            return Ok(());
        }

        metrics::counter!("vela_ledger_entries_removed_total").increment(1);
        info!(template = %key, "Removed version ledger entry");
        self.event_bus.publish_template_event(TemplateEvent::LedgerEntryRemoved {
            template: key.clone(),
            removed_at: Utc::now(),
        });
        Ok(())
    }
}
