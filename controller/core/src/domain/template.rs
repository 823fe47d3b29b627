// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ModelTemplate Aggregate
//!
//! Named configuration root owning zero or more [`ModelTemplateVersion`]s.
//! Created by API clients; only the template reconciler writes to it.
//!
//! [`ModelTemplateVersion`]: crate::domain::version::ModelTemplateVersion

use serde::{Deserialize, Serialize};

use crate::domain::condition::{Condition, ConditionType, Conditioned};
use crate::domain::meta::{ObjectKey, ObjectMeta, OwnerReference, Resource, ML_API_VERSION};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Version name in the template's namespace, or `namespace/name`.
    /// Filled in with the earliest assigned version when left empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_version_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateStatus {
    #[serde(default)]
    pub default_version: u32,
    #[serde(default)]
    pub latest_version: u32,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplate {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ModelTemplateSpec,
    #[serde(default)]
    pub status: ModelTemplateStatus,
}

impl ModelTemplate {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ModelTemplateSpec::default(),
            status: ModelTemplateStatus::default(),
        }
    }

    pub fn with_default_version_ref(mut self, reference: impl Into<String>) -> Self {
        self.spec.default_version_ref = Some(reference.into());
        self
    }

    /// Resolve `spec.default_version_ref` against the template's namespace.
    pub fn default_version_key(&self) -> Option<ObjectKey> {
        self.spec
            .default_version_ref
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| ObjectKey::parse_ref(r, &self.metadata.namespace))
    }

    /// Owner reference to stamp on member versions. `None` until the store
    /// has assigned a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.metadata.uid.map(|uid| OwnerReference {
            api_version: ML_API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            name: self.metadata.name.clone(),
            uid,
        })
    }

    pub fn is_default_version_resolved(&self) -> bool {
        self.is_condition_true(ConditionType::DefaultVersionResolved)
    }
}

impl Resource for ModelTemplate {
    const KIND: &'static str = "ModelTemplate";

    type Spec = ModelTemplateSpec;
    type Status = ModelTemplateStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn spec(&self) -> &ModelTemplateSpec {
        &self.spec
    }
    fn status(&self) -> &ModelTemplateStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut ModelTemplateStatus {
        &mut self.status
    }
}

impl Conditioned for ModelTemplate {
    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_version_key_resolves_namespace() {
        let template = ModelTemplate::new("team-a", "llama").with_default_version_ref("v1");
        assert_eq!(template.default_version_key(), Some(ObjectKey::new("team-a", "v1")));

        let empty = ModelTemplate::new("team-a", "llama").with_default_version_ref("");
        assert_eq!(empty.default_version_key(), None);
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut template = ModelTemplate::new("team-a", "llama");
        assert!(template.owner_reference().is_none());

        let uid = uuid::Uuid::new_v4();
        template.metadata.uid = Some(uid);
        let owner = template.owner_reference().unwrap();
        assert_eq!(owner.kind, "ModelTemplate");
        assert_eq!(owner.name, "llama");
        assert_eq!(owner.uid, uid);
    }
}
