// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Template Reconciler
//!
//! Two independent, re-entrant handlers on `ModelTemplate`:
//!
//! - [`DefaultVersionResolver`] fills in `default_version_ref` with the
//!   earliest assigned member, then resolves the reference into
//!   `status.default_version`. A reference that cannot be resolved yet is
//!   reported through `DefaultVersionResolved=false`, not as an error.
//! - [`LatestVersionSync`] copies the ledger value into `status.latest_version`.
//!
//! Members are found on demand with the template label plus an owner uid
//! check; the template keeps no list of its versions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::application::condition_status;
use crate::application::ledger::VersionLedger;
use crate::application::reconcile::{ChangeHandler, ReconcileError, ReconcileOutcome};
use crate::domain::condition::{ConditionType, Conditioned};
use crate::domain::events::TemplateEvent;
use crate::domain::meta::{ObjectKey, Resource, LABEL_MODEL_TEMPLATE_NAME};
use crate::domain::store::{LabelSelector, ResourceStore};
use crate::domain::template::ModelTemplate;
use crate::domain::version::ModelTemplateVersion;
use crate::infrastructure::event_bus::EventBus;

pub struct DefaultVersionResolver {
    templates: Arc<dyn ResourceStore<ModelTemplate>>,
    versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
    event_bus: Arc<EventBus>,
}

impl DefaultVersionResolver {
    pub fn new(
        templates: Arc<dyn ResourceStore<ModelTemplate>>,
        versions: Arc<dyn ResourceStore<ModelTemplateVersion>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            templates,
            versions,
            event_bus,
        }
    }

    /// Assigned members of `template`, earliest first.
    async fn assigned_members(
        &self,
        template: &ModelTemplate,
    ) -> Result<Vec<ModelTemplateVersion>, ReconcileError> {
        let selector = LabelSelector::everything()
            .with(LABEL_MODEL_TEMPLATE_NAME, template.metadata.name.clone());
        let mut members: Vec<_> = self
            .versions
            .list(Some(&template.metadata.namespace), &selector)
            .await?
            .into_iter()
            .filter(|v| v.is_owned_by(template) && v.is_assigned())
            .collect();
        members.sort_by(|a, b| {
            (a.metadata.creation_timestamp, &a.metadata.name)
                .cmp(&(b.metadata.creation_timestamp, &b.metadata.name))
        });
        Ok(members)
    }

    async fn select_default(
        &self,
        template: &ModelTemplate,
    ) -> Result<ReconcileOutcome<ModelTemplate>, ReconcileError> {
        let members = self.assigned_members(template).await?;
        let Some(earliest) = members.first() else {
            debug!(
                template = %template.key(),
                "No assigned versions yet, default version left unset"
            );
            return Ok(ReconcileOutcome::Unchanged);
        };

        let mut updated = template.clone();
        updated.spec.default_version_ref = Some(earliest.metadata.name.clone());
        let persisted = self.templates.update(&updated).await?;
        info!(
            template = %template.key(),
            version = %earliest.metadata.name,
            "Selected default version"
        );

        self.event_bus.publish_template_event(TemplateEvent::DefaultVersionSelected {
            template: template.key(),
            version_ref: earliest.metadata.name.clone(),
            selected_at: Utc::now(),
        });
        Ok(ReconcileOutcome::Updated(persisted))
    }

    async fn resolve_default(
        &self,
        template: &ModelTemplate,
        version_key: ObjectKey,
    ) -> Result<ReconcileOutcome<ModelTemplate>, ReconcileError> {
        let version = match self.versions.get(&version_key.namespace, &version_key.name).await? {
            Some(version) => version,
            None => {
                let message = format!("default version {} not found", version_key);
                return self.unresolved(template, message).await;
            }
        };

        if version.template_key() != template.key() {
            let message = format!(
                "default version {} belongs to {} {}",
                version_key,
                ModelTemplate::KIND,
                version.template_key()
            );
            return self.unresolved(template, message).await;
        }
        let Some(number) = version.assigned_version() else {
            let message = format!(
                "default version {} has not been assigned a version number yet",
                version_key
            );
            return self.unresolved(template, message).await;
        };
        if !version.is_owned_by(template) {
            let message = format!(
                "default version {} is owned by an earlier {}",
                version_key,
                ModelTemplate::KIND
            );
            return self.unresolved(template, message).await;
        }

        if template.status.default_version == number
            && template.status.observed_generation == template.metadata.generation
            && template.condition_matches(ConditionType::DefaultVersionResolved, true, "")
        {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mut updated = template.clone();
        updated.status.default_version = number;
        updated.status.observed_generation = template.metadata.generation;
        updated.set_condition(ConditionType::DefaultVersionResolved, true, "", "");
        let persisted = self.templates.update_status(&updated).await?;
        info!(template = %template.key(), default_version = number, "Resolved default version");

        self.event_bus.publish_template_event(TemplateEvent::DefaultVersionResolved {
            template: template.key(),
            default_version: number,
            resolved_at: Utc::now(),
        });
        Ok(ReconcileOutcome::Updated(persisted))
    }

    async fn unresolved(
        &self,
        template: &ModelTemplate,
        message: String,
    ) -> Result<ReconcileOutcome<ModelTemplate>, ReconcileError> {
        let outcome = condition_status::set_condition(
            self.templates.as_ref(),
            template,
            ConditionType::DefaultVersionResolved,
            false,
            &message,
        )
        .await?;

        if outcome.is_updated() {
            info!(template = %template.key(), %message, "Default version unresolved");
            self.event_bus.publish_template_event(TemplateEvent::DefaultVersionUnresolved {
                template: template.key(),
                message,
                observed_at: Utc::now(),
            });
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ChangeHandler<ModelTemplate> for DefaultVersionResolver {
    async fn on_change(
        &self,
        _key: &ObjectKey,
        template: &ModelTemplate,
    ) -> Result<ReconcileOutcome<ModelTemplate>, ReconcileError> {
        if template.metadata.is_deleting() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        match template.default_version_key() {
            None => self.select_default(template).await,
            Some(version_key) => self.resolve_default(template, version_key).await,
        }
    }
}

pub struct LatestVersionSync {
    templates: Arc<dyn ResourceStore<ModelTemplate>>,
    ledger: Arc<VersionLedger>,
    event_bus: Arc<EventBus>,
}

impl LatestVersionSync {
    pub fn new(
        templates: Arc<dyn ResourceStore<ModelTemplate>>,
        ledger: Arc<VersionLedger>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            templates,
            ledger,
            event_bus,
        }
    }
}

#[async_trait]
impl ChangeHandler<ModelTemplate> for LatestVersionSync {
    async fn on_change(
        &self,
        key: &ObjectKey,
        template: &ModelTemplate,
    ) -> Result<ReconcileOutcome<ModelTemplate>, ReconcileError> {
        if template.metadata.is_deleting() {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let latest = self.ledger.get_for(key, template.metadata.uid);
        if latest == template.status.latest_version {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mut updated = template.clone();
        updated.status.latest_version = latest;
        updated.status.observed_generation = template.metadata.generation;
        let persisted = self.templates.update_status(&updated).await?;
        debug!(template = %key, latest_version = latest, "Synced latest version");

        self.event_bus.publish_template_event(TemplateEvent::LatestVersionSynced {
            template: key.clone(),
            latest_version: latest,
            synced_at: Utc::now(),
        });
        Ok(ReconcileOutcome::Updated(persisted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::{StoreError, WatchEvent};
    use crate::infrastructure::store::InMemoryResourceStore;
    use chrono::TimeZone;
    use tokio::sync::broadcast;

    struct Fixture {
        templates: Arc<InMemoryResourceStore<ModelTemplate>>,
        versions: Arc<InMemoryResourceStore<ModelTemplateVersion>>,
        resolver: DefaultVersionResolver,
    }

    fn fixture() -> Fixture {
        let templates = Arc::new(InMemoryResourceStore::new());
        let versions = Arc::new(InMemoryResourceStore::new());
        let resolver = DefaultVersionResolver::new(
            templates.clone(),
            versions.clone(),
            Arc::new(EventBus::default()),
        );
        Fixture {
            templates,
            versions,
            resolver,
        }
    }

    /// Store an assigned, linked member of `template` created at `hh:mm`.
    async fn member(
        f: &Fixture,
        template: &ModelTemplate,
        name: &str,
        number: u32,
        created: (u32, u32),
    ) -> ModelTemplateVersion {
        let mut version =
            ModelTemplateVersion::new("default", name, template.metadata.name.clone());
        version.metadata.creation_timestamp =
            Some(Utc.with_ymd_and_hms(2026, 1, 1, created.0, created.1, 0).unwrap());
        version
            .metadata
            .labels
            .insert(LABEL_MODEL_TEMPLATE_NAME.to_string(), template.metadata.name.clone());
        version.metadata.owner_references.push(template.owner_reference().unwrap());
        let created = f.versions.create(&version).await.unwrap();

        let mut assigned = created;
        assigned.status.version = number;
        assigned.set_condition(ConditionType::Assigned, true, "", "");
        f.versions.update_status(&assigned).await.unwrap()
    }

    async fn settle(f: &Fixture, template: ModelTemplate) -> ModelTemplate {
        let key = template.key();
        let mut current = template;
        for _ in 0..5 {
            match f.resolver.on_change(&key, &current).await.unwrap() {
                ReconcileOutcome::Updated(updated) => current = updated,
                ReconcileOutcome::Unchanged => return current,
            }
        }
        panic!("template {} did not settle", key);
    }

    #[tokio::test]
    async fn test_no_members_is_a_no_op() {
        let f = fixture();
        let template = f.templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();
        let outcome = f.resolver.on_change(&template.key(), &template).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert!(template.condition(ConditionType::DefaultVersionResolved).is_none());
    }

    #[tokio::test]
    async fn test_earliest_assigned_member_becomes_default() {
        let f = fixture();
        let template = f.templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();
        member(&f, &template, "v2", 2, (10, 5)).await;
        member(&f, &template, "v1", 1, (10, 0)).await;

        let settled = settle(&f, template).await;
        assert_eq!(settled.spec.default_version_ref.as_deref(), Some("v1"));
        assert_eq!(settled.status.default_version, 1);
        assert!(settled.is_default_version_resolved());
    }

    #[tokio::test]
    async fn test_creation_time_ties_break_by_name() {
        let f = fixture();
        let template = f.templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();
        member(&f, &template, "beta", 2, (10, 0)).await;
        member(&f, &template, "alpha", 1, (10, 0)).await;

        let settled = settle(&f, template).await;
        assert_eq!(settled.spec.default_version_ref.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_members_of_a_previous_template_are_ignored() {
        let f = fixture();
        let old = f.templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();
        member(&f, &old, "v1", 1, (10, 0)).await;
        f.templates.delete("default", "llama").await.unwrap();

        let fresh = f.templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();
        let outcome = f.resolver.on_change(&fresh.key(), &fresh).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_reference_sets_false_condition_once() {
        let f = fixture();
        let template = f
            .templates
            .create(&ModelTemplate::new("default", "llama").with_default_version_ref("v3"))
            .await
            .unwrap();

        let settled = settle(&f, template).await;
        let condition = settled.condition(ConditionType::DefaultVersionResolved).unwrap();
        assert!(!settled.is_default_version_resolved());
        assert_eq!(condition.message, "default version default/v3 not found");

        let writes = f.templates.writes();
        f.resolver.on_change(&settled.key(), &settled).await.unwrap();
        assert_eq!(f.templates.writes(), writes);
    }

    #[tokio::test]
    async fn test_unassigned_reference_is_unresolved() {
        let f = fixture();
        let template = f
            .templates
            .create(&ModelTemplate::new("default", "llama").with_default_version_ref("v1"))
            .await
            .unwrap();
        f.versions
            .create(&ModelTemplateVersion::new("default", "v1", "llama"))
            .await
            .unwrap();

        let settled = settle(&f, template).await;
        let condition = settled.condition(ConditionType::DefaultVersionResolved).unwrap();
        assert!(condition.message.contains("has not been assigned"));
        assert_eq!(settled.status.default_version, 0);
    }

    #[tokio::test]
    async fn test_reference_to_another_template_is_unresolved() {
        let f = fixture();
        let mistral = f.templates.create(&ModelTemplate::new("default", "mistral")).await.unwrap();
        member(&f, &mistral, "m1", 1, (9, 0)).await;
        let template = f
            .templates
            .create(&ModelTemplate::new("default", "llama").with_default_version_ref("m1"))
            .await
            .unwrap();

        let settled = settle(&f, template).await;
        let condition = settled.condition(ConditionType::DefaultVersionResolved).unwrap();
        assert!(condition.message.contains("belongs to ModelTemplate default/mistral"));
    }

    #[tokio::test]
    async fn test_resolved_default_is_not_rewritten() {
        let f = fixture();
        let template = f
            .templates
            .create(&ModelTemplate::new("default", "llama").with_default_version_ref("v1"))
            .await
            .unwrap();
        member(&f, &template, "v1", 1, (10, 0)).await;

        let settled = settle(&f, template).await;
        assert_eq!(settled.status.default_version, 1);
        assert_eq!(settled.status.observed_generation, settled.metadata.generation);

        let writes = f.templates.writes();
        let outcome = f.resolver.on_change(&settled.key(), &settled).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(f.templates.writes(), writes);
    }

    struct FailingVersions;

    #[async_trait]
    impl ResourceStore<ModelTemplateVersion> for FailingVersions {
        async fn get(&self, _: &str, _: &str) -> Result<Option<ModelTemplateVersion>, StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        async fn list(
            &self,
            _: Option<&str>,
            _: &LabelSelector,
        ) -> Result<Vec<ModelTemplateVersion>, StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        async fn create(
            &self,
            _: &ModelTemplateVersion,
        ) -> Result<ModelTemplateVersion, StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        async fn update(
            &self,
            _: &ModelTemplateVersion,
        ) -> Result<ModelTemplateVersion, StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        async fn update_status(
            &self,
            _: &ModelTemplateVersion,
        ) -> Result<ModelTemplateVersion, StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("unavailable".to_string()))
        }
        fn watch(&self) -> broadcast::Receiver<WatchEvent<ModelTemplateVersion>> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_is_an_error() {
        let templates = Arc::new(InMemoryResourceStore::new());
        let resolver = DefaultVersionResolver::new(
            templates.clone(),
            Arc::new(FailingVersions),
            Arc::new(EventBus::default()),
        );
        let template = templates
            .create(&ModelTemplate::new("default", "llama").with_default_version_ref("v1"))
            .await
            .unwrap();

        let err = resolver.on_change(&template.key(), &template).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_latest_version_sync() {
        let templates = Arc::new(InMemoryResourceStore::new());
        let ledger = Arc::new(VersionLedger::new());
        let sync = LatestVersionSync::new(
            templates.clone(),
            ledger.clone(),
            Arc::new(EventBus::default()),
        );
        let template = templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();

        assert_eq!(
            sync.on_change(&template.key(), &template).await.unwrap(),
            ReconcileOutcome::Unchanged
        );

        ledger.increment(&template.key());
        ledger.increment(&template.key());
        let synced = sync
            .on_change(&template.key(), &template)
            .await
            .unwrap()
            .into_updated()
            .unwrap();
        assert_eq!(synced.status.latest_version, 2);

        let writes = templates.writes();
        assert_eq!(
            sync.on_change(&synced.key(), &synced).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
        assert_eq!(templates.writes(), writes);
    }

    #[tokio::test]
    async fn test_latest_version_sync_ignores_earlier_template_count() {
        let templates = Arc::new(InMemoryResourceStore::new());
        let ledger = Arc::new(VersionLedger::new());
        let sync = LatestVersionSync::new(
            templates.clone(),
            ledger.clone(),
            Arc::new(EventBus::default()),
        );
        let template = templates.create(&ModelTemplate::new("default", "llama")).await.unwrap();

        // Count left behind by a deleted template of the same name
        let deleted = Some(uuid::Uuid::new_v4());
        ledger.increment_for(&template.key(), deleted);
        ledger.increment_for(&template.key(), deleted);
        assert_eq!(
            sync.on_change(&template.key(), &template).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
    }
}
