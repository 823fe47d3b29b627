// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Serving Config Handler - renders `status.generated_model_config` of a
// version through the configured `ConfigGenerator`. Runs beside the version
// reconciler; numbering never waits on it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::application::condition_status;
use crate::application::reconcile::{ChangeHandler, ReconcileError, ReconcileOutcome};
use crate::domain::condition::{ConditionType, Conditioned};
use crate::domain::events::VersionEvent;
use crate::domain::meta::ObjectKey;
use crate::domain::serving::ConfigGenerator;
use crate::domain::store::ResourceStore;
use crate::domain::version::ModelTemplateVersion;
use crate::infrastructure::event_bus::EventBus;

pub struct VersionConfigHandler {
    versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
    generator: Arc<dyn ConfigGenerator>,
    event_bus: Arc<EventBus>,
}

impl VersionConfigHandler {
    pub fn new(
        versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
        generator: Arc<dyn ConfigGenerator>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            versions,
            generator,
            event_bus,
        }
    }

    fn publish(&self, key: &ObjectKey, succeeded: bool, message: String) {
        self.event_bus.publish_version_event(VersionEvent::VersionConfigured {
            version: key.clone(),
            succeeded,
            message,
            configured_at: Utc::now(),
        });
    }
}

#[async_trait]
impl ChangeHandler<ModelTemplateVersion> for VersionConfigHandler {
    async fn on_change(
        &self,
        key: &ObjectKey,
        version: &ModelTemplateVersion,
    ) -> Result<ReconcileOutcome<ModelTemplateVersion>, ReconcileError> {
        if version.metadata.is_deleting() || version.is_condition_true(ConditionType::Configured) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        match self.generator.generate(version) {
            Ok(config) => {
                let mut configured = version.clone();
                configured.status.generated_model_config = Some(config);
                configured.set_condition(ConditionType::Configured, true, "", "");
                let persisted = self.versions.update_status(&configured).await?;
                debug!(version = %key, "Generated serving config");
                self.publish(key, true, String::new());
                Ok(ReconcileOutcome::Updated(persisted))
            }
            Err(e) => {
                let message = e.to_string();
                let outcome = condition_status::set_condition(
                    self.versions.as_ref(),
                    version,
                    ConditionType::Configured,
                    false,
                    &message,
                )
                .await?;
                if outcome.is_updated() {
                    warn!(version = %key, error = %message, "Failed to generate serving config");
                    self.publish(key, false, message);
                }
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::meta::Resource;
    use crate::domain::serving::ConfigGenerationError;
    use crate::infrastructure::store::InMemoryResourceStore;
    use crate::infrastructure::serving_config::RayLlmConfigGenerator;

    struct FixedGenerator(Result<&'static str, &'static str>);

    impl ConfigGenerator for FixedGenerator {
        fn generate(
            &self,
            _version: &ModelTemplateVersion,
        ) -> Result<String, ConfigGenerationError> {
            self.0
                .map(str::to_string)
                .map_err(|e| ConfigGenerationError::InvalidMirrorConfig(e.to_string()))
        }
    }

    fn handler(
        store: &Arc<InMemoryResourceStore<ModelTemplateVersion>>,
        result: Result<&'static str, &'static str>,
    ) -> VersionConfigHandler {
        VersionConfigHandler::new(
            store.clone(),
            Arc::new(FixedGenerator(result)),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn test_success_writes_config_once() {
        let store = Arc::new(InMemoryResourceStore::new());
        let version = store
            .create(&ModelTemplateVersion::new("default", "v1", "llama"))
            .await
            .unwrap();
        let handler = handler(&store, Ok("deployment_config: {}\n"));

        let configured = handler
            .on_change(&version.key(), &version)
            .await
            .unwrap()
            .into_updated()
            .unwrap();
        assert!(configured.is_condition_true(ConditionType::Configured));
        assert_eq!(
            configured.status.generated_model_config.as_deref(),
            Some("deployment_config: {}\n")
        );

        let writes = store.writes();
        assert_eq!(
            handler.on_change(&configured.key(), &configured).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_on_condition() {
        let store = Arc::new(InMemoryResourceStore::new());
        let version = store
            .create(&ModelTemplateVersion::new("default", "v1", "llama"))
            .await
            .unwrap();
        let handler = handler(&store, Err("ftp://models"));

        let failed = handler
            .on_change(&version.key(), &version)
            .await
            .unwrap()
            .into_updated()
            .unwrap();
        let condition = failed.condition(ConditionType::Configured).unwrap();
        assert_eq!(condition.message, "invalid mirror config: ftp://models");
        assert!(failed.status.generated_model_config.is_none());

        let writes = store.writes();
        handler.on_change(&failed.key(), &failed).await.unwrap();
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_negative_deployment_value_is_not_configured() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut version =
            ModelTemplateVersion::new("default", "v1", "llama").with_model_id("meta/llama");
        version.spec.deployment_config.max_concurrent_queries = -1;
        let version = store.create(&version).await.unwrap();
        let handler = VersionConfigHandler::new(
            store.clone(),
            Arc::new(RayLlmConfigGenerator::new()),
            Arc::new(EventBus::default()),
        );

        let failed = handler
            .on_change(&version.key(), &version)
            .await
            .unwrap()
            .into_updated()
            .unwrap();
        assert!(!failed.is_condition_true(ConditionType::Configured));
        let condition = failed.condition(ConditionType::Configured).unwrap();
        assert_eq!(
            condition.message,
            "deploymentConfig.maxConcurrentQueries must not be negative, got -1"
        );
    }
}
