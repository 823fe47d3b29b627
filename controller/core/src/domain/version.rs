// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ModelTemplateVersion
//!
//! Immutable, numbered revision of a [`ModelTemplate`]. The spec carries the
//! model serving fields; the status carries the assigned number, the
//! `Assigned`/`Configured` conditions and the rendered serving config.
//!
//! State machine driven by the version reconciler:
//! `Unlinked -> Linked (label + owner reference) -> Assigned`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::condition::{Condition, ConditionType, Conditioned};
use crate::domain::meta::{ObjectKey, ObjectMeta, Resource, LABEL_MODEL_TEMPLATE_NAME};
use crate::domain::template::ModelTemplate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineType {
    #[default]
    #[serde(rename = "VLLMEngine")]
    Vllm,
    #[serde(rename = "EmbeddingEngine")]
    Embedding,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vllm => "VLLMEngine",
            Self::Embedding => "EmbeddingEngine",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStrategy {
    #[default]
    StrictPack,
    Pack,
    Spread,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictPack => "STRICT_PACK",
            Self::Pack => "PACK",
            Self::Spread => "SPREAD",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFormat {
    pub system: String,
    pub assistant: String,
    pub trailing_assistant: String,
    pub user: String,
    pub default_system_message: String,
    /// When true the user field should include `{system}`
    pub system_in_user: bool,
    pub add_system_tags_even_if_message_is_empty: bool,
    pub strip_whitespace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    pub prompt_format: PromptFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    #[serde(rename = "type")]
    pub engine_type: EngineType,
    pub max_total_tokens: i32,
    /// Raw YAML mapping passed through as engine kwargs
    #[serde(rename = "vLLMArgs", skip_serializing_if = "Option::is_none")]
    pub vllm_args: Option<String>,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfig {
    pub replicas: i32,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub max_concurrent_queries: i32,
    /// 0 means "derive from max_concurrent_queries"
    pub target_num_ongoing_requests: i32,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            replicas: 1,
            min_replicas: 1,
            max_replicas: 2,
            max_concurrent_queries: 0,
            target_num_ongoing_requests: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingConfig {
    pub num_workers: i32,
    #[serde(rename = "numCPUsPerWorker")]
    pub num_cpus_per_worker: i32,
    pub placement_strategy: PlacementStrategy,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resources_per_worker: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateVersionSpec {
    /// Owning template in the same namespace. Set at creation, immutable.
    pub template_name: String,

    #[serde(default, rename = "modelID")]
    pub model_id: String,

    /// Hugging Face model ID, defaults to `model_id`
    #[serde(default, rename = "hfModelID", skip_serializing_if = "Option::is_none")]
    pub hf_model_id: Option<String>,

    /// Private model mirror, `s3://...` or `gs://...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_config: Option<String>,

    #[serde(default)]
    pub engine_config: EngineConfig,
    #[serde(default)]
    pub deployment_config: DeploymentConfig,
    #[serde(default)]
    pub scaling_config: ScalingConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionSpecError {
    #[error("modelID is required")]
    MissingModelId,

    #[error("can't set both HF model ID and mirror config at the same time")]
    ConflictingModelSource,

    #[error("deploymentConfig.{field} must not be negative, got {value}")]
    NegativeDeploymentValue { field: &'static str, value: i32 },
}

impl ModelTemplateVersionSpec {
    pub fn validate(&self) -> Result<(), VersionSpecError> {
        if self.model_id.trim().is_empty() {
            return Err(VersionSpecError::MissingModelId);
        }
        let has_hf = self.hf_model_id.as_deref().is_some_and(|s| !s.is_empty());
        let has_mirror = self.mirror_config.as_deref().is_some_and(|s| !s.is_empty());
        if has_hf && has_mirror {
            return Err(VersionSpecError::ConflictingModelSource);
        }

        let deployment = &self.deployment_config;
        for (field, value) in [
            ("replicas", deployment.replicas),
            ("minReplicas", deployment.min_replicas),
            ("maxReplicas", deployment.max_replicas),
            ("maxConcurrentQueries", deployment.max_concurrent_queries),
            ("targetNumOngoingRequests", deployment.target_num_ongoing_requests),
        ] {
            if value < 0 {
                return Err(VersionSpecError::NegativeDeploymentValue { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateVersionStatus {
    /// Assigned number, 0 until assigned
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_model_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplateVersion {
    pub metadata: ObjectMeta,
    pub spec: ModelTemplateVersionSpec,
    #[serde(default)]
    pub status: ModelTemplateVersionStatus,
}

impl ModelTemplateVersion {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ModelTemplateVersionSpec {
                template_name: template_name.into(),
                ..Default::default()
            },
            status: ModelTemplateVersionStatus::default(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.spec.model_id = model_id.into();
        self
    }

    /// Ledger key: the owning template's identity.
    pub fn template_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.spec.template_name.clone())
    }

    pub fn is_assigned(&self) -> bool {
        self.is_condition_true(ConditionType::Assigned)
    }

    /// Assigned number, or `None` when the `Assigned` condition is not true.
    pub fn assigned_version(&self) -> Option<u32> {
        self.is_assigned().then_some(self.status.version)
    }

    /// Uid of the owning template incarnation, if linked.
    pub fn owner_uid(&self) -> Option<Uuid> {
        self.metadata
            .owner_references
            .iter()
            .find(|owner| {
                owner.kind == ModelTemplate::KIND && owner.name == self.spec.template_name
            })
            .map(|owner| owner.uid)
    }

    pub fn is_owned_by(&self, template: &ModelTemplate) -> bool {
        template
            .metadata
            .uid
            .is_some_and(|uid| self.metadata.is_owned_by(ModelTemplate::KIND, uid))
    }

    /// Label and owner reference both point at `template`.
    pub fn is_linked_to(&self, template: &ModelTemplate) -> bool {
        self.metadata.label(LABEL_MODEL_TEMPLATE_NAME) == Some(template.metadata.name.as_str())
            && self.is_owned_by(template)
    }
}

impl Resource for ModelTemplateVersion {
    const KIND: &'static str = "ModelTemplateVersion";

    type Spec = ModelTemplateVersionSpec;
    type Status = ModelTemplateVersionStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn spec(&self) -> &ModelTemplateVersionSpec {
        &self.spec
    }
    fn status(&self) -> &ModelTemplateVersionStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut ModelTemplateVersionStatus {
        &mut self.status
    }
}

impl Conditioned for ModelTemplateVersion {
    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}
