// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ray-LLM Model Config Generator
//
// Renders a ModelTemplateVersion into the Ray-LLM serving YAML:
// - deployment_config: autoscaling derived from replicas and queries
// - engine_config: model source, engine kwargs, prompt format
// - scaling_config: workers with one GPU each

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::serving::{ConfigGenerationError, ConfigGenerator};
use crate::domain::version::{GenerationConfig, ModelTemplateVersion, PromptFormat};

/// Share of max concurrent queries used as the per-replica autoscaling target
const TARGET_ONGOING_REQUESTS_PERCENT: i64 = 40;

const METRICS_INTERVAL_S: f64 = 10.0;
const LOOK_BACK_PERIOD_S: f64 = 30.0;
const SMOOTHING_FACTOR: f64 = 0.6;
const DOWNSCALE_DELAY_S: f64 = 300.0;
const UPSCALE_DELAY_S: f64 = 60.0;

const DEFAULT_MAX_NUM_SEQ: i64 = 32;
const DEFAULT_GPU_MEMORY_UTILIZATION: f64 = 0.9;

const DEFAULT_SYSTEM_PROMPT: &str = "<<SYS>>\\n{instruction}\\n<</SYS>>\\n\\n";
const DEFAULT_ASSISTANT_PROMPT: &str = " {instruction} </s><s>";
const DEFAULT_USER_PROMPT: &str = "[INST] {system}{instruction} [/INST]";
const DEFAULT_STOPPING_SEQUENCE: &str = "\"<unk>\"";

#[derive(Debug, Serialize)]
struct RayLlmModelConfig {
    deployment_config: DeploymentConfig,
    engine_config: EngineConfig,
    scaling_config: ScalingConfig,
}

#[derive(Debug, Serialize)]
struct DeploymentConfig {
    auto_scaling_config: AutoScalingConfig,
    max_concurrent_queries: i32,
    ray_actor_options: RayActorOptions,
}

#[derive(Debug, Default, Serialize)]
struct RayActorOptions {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    resources: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct AutoScalingConfig {
    min_replicas: i32,
    max_replicas: i32,
    initial_replicas: i32,
    target_num_ongoing_requests_per_replica: i32,
    metrics_interval_s: f64,
    look_back_period_s: f64,
    smoothing_factor: f64,
    downscale_delay_s: f64,
    upscale_delay_s: f64,
}

#[derive(Debug, Serialize)]
struct EngineConfig {
    model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hf_model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s3_mirror_config: Option<MirrorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gcs_mirror_config: Option<MirrorConfig>,
    #[serde(rename = "type")]
    engine_type: &'static str,
    engine_kwargs: serde_yaml::Mapping,
    max_total_tokens: i32,
    generation: Generation,
}

#[derive(Debug, Serialize)]
struct MirrorConfig {
    bucket_uri: String,
}

#[derive(Debug, Serialize)]
struct Generation {
    prompt_format: Prompt,
    stopping_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Prompt {
    system: String,
    assistant: String,
    trailing_assistant: String,
    user: String,
    default_system_message: String,
    system_in_user: bool,
    add_system_tags_even_if_message_is_empty: bool,
    strip_whitespace: bool,
}

#[derive(Debug, Serialize)]
struct ScalingConfig {
    num_workers: i32,
    num_gpus_per_worker: i32,
    num_cpus_per_worker: i32,
    placement_strategy: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    resources_per_worker: BTreeMap<String, String>,
}

/// 40% of `max_concurrent_queries`, computed in `i64`. The result never
/// exceeds the input, so it always fits back into an `i32`.
fn target_ongoing_requests(max_concurrent_queries: i32) -> i32 {
    let target = i64::from(max_concurrent_queries) * TARGET_ONGOING_REQUESTS_PERCENT / 100;
    i32::try_from(target).unwrap_or(max_concurrent_queries)
}

/// Generates Ray-LLM model configs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayLlmConfigGenerator;

impl RayLlmConfigGenerator {
    pub fn new() -> Self {
        Self
    }

    fn deployment_config(version: &ModelTemplateVersion) -> DeploymentConfig {
        let deployment = &version.spec.deployment_config;
        let target = if deployment.target_num_ongoing_requests == 0 {
            target_ongoing_requests(deployment.max_concurrent_queries)
        } else {
            deployment.target_num_ongoing_requests
        };

        DeploymentConfig {
            auto_scaling_config: AutoScalingConfig {
                min_replicas: deployment.min_replicas,
                max_replicas: deployment.max_replicas,
                initial_replicas: deployment.replicas,
                target_num_ongoing_requests_per_replica: target,
                metrics_interval_s: METRICS_INTERVAL_S,
                look_back_period_s: LOOK_BACK_PERIOD_S,
                smoothing_factor: SMOOTHING_FACTOR,
                downscale_delay_s: DOWNSCALE_DELAY_S,
                upscale_delay_s: UPSCALE_DELAY_S,
            },
            max_concurrent_queries: deployment.max_concurrent_queries,
            ray_actor_options: RayActorOptions::default(),
        }
    }

    fn engine_kwargs(
        version: &ModelTemplateVersion,
    ) -> Result<serde_yaml::Mapping, ConfigGenerationError> {
        let engine = &version.spec.engine_config;
        match engine.vllm_args.as_deref().filter(|args| !args.trim().is_empty()) {
            Some(args) => serde_yaml::from_str::<serde_yaml::Mapping>(args)
                .map_err(|e| ConfigGenerationError::InvalidEngineArgs(e.to_string())),
            None => {
                let mut kwargs = serde_yaml::Mapping::new();
                kwargs.insert("trust_remote_code".into(), true.into());
                kwargs.insert(
                    "max_num_batched_tokens".into(),
                    i64::from(engine.max_total_tokens).into(),
                );
                kwargs.insert("max_num_seq".into(), DEFAULT_MAX_NUM_SEQ.into());
                kwargs.insert(
                    "gpu_memory_utilization".into(),
                    DEFAULT_GPU_MEMORY_UTILIZATION.into(),
                );
                Ok(kwargs)
            }
        }
    }

    /// Empty prompt fields fall back to the Llama-2 chat format.
    fn generation(generation: &GenerationConfig) -> Generation {
        let prompt: &PromptFormat = &generation.prompt_format;
        let or_default = |value: &str, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };

        Generation {
            prompt_format: Prompt {
                system: or_default(&prompt.system, DEFAULT_SYSTEM_PROMPT),
                assistant: or_default(&prompt.assistant, DEFAULT_ASSISTANT_PROMPT),
                trailing_assistant: prompt.trailing_assistant.clone(),
                user: or_default(&prompt.user, DEFAULT_USER_PROMPT),
                default_system_message: prompt.default_system_message.clone(),
                system_in_user: true,
                add_system_tags_even_if_message_is_empty: prompt
                    .add_system_tags_even_if_message_is_empty,
                strip_whitespace: prompt.strip_whitespace,
            },
            stopping_sequences: generation
                .stopping_sequences
                .clone()
                .unwrap_or_else(|| vec![DEFAULT_STOPPING_SEQUENCE.to_string()]),
        }
    }

    fn engine_config(
        version: &ModelTemplateVersion,
    ) -> Result<EngineConfig, ConfigGenerationError> {
        let spec = &version.spec;
        let mut config = EngineConfig {
            model_id: spec.model_id.clone(),
            hf_model_id: None,
            s3_mirror_config: None,
            gcs_mirror_config: None,
            engine_type: spec.engine_config.engine_type.as_str(),
            engine_kwargs: Self::engine_kwargs(version)?,
            max_total_tokens: spec.engine_config.max_total_tokens,
            generation: Self::generation(&spec.engine_config.generation),
        };

        match spec.mirror_config.as_deref().filter(|m| !m.is_empty()) {
            Some(mirror) if mirror.contains("s3://") => {
                config.s3_mirror_config = Some(MirrorConfig {
                    bucket_uri: mirror.to_string(),
                });
            }
            Some(mirror) if mirror.contains("gs://") => {
                config.gcs_mirror_config = Some(MirrorConfig {
                    bucket_uri: mirror.to_string(),
                });
            }
            Some(mirror) => {
                return Err(ConfigGenerationError::InvalidMirrorConfig(mirror.to_string()))
            }
            None => {
                let hf_model_id = spec
                    .hf_model_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| spec.model_id.clone());
                config.hf_model_id = Some(hf_model_id);
            }
        }
        Ok(config)
    }

    fn scaling_config(version: &ModelTemplateVersion) -> ScalingConfig {
        let scaling = &version.spec.scaling_config;
        ScalingConfig {
            num_workers: scaling.num_workers,
            num_gpus_per_worker: 1,
            num_cpus_per_worker: scaling.num_cpus_per_worker,
            placement_strategy: scaling.placement_strategy.as_str(),
            resources_per_worker: scaling.resources_per_worker.clone(),
        }
    }
}

impl ConfigGenerator for RayLlmConfigGenerator {
    fn generate(&self, version: &ModelTemplateVersion) -> Result<String, ConfigGenerationError> {
        version.spec.validate()?;

        let config = RayLlmModelConfig {
            deployment_config: Self::deployment_config(version),
            engine_config: Self::engine_config(version)?,
            scaling_config: Self::scaling_config(version),
        };
        serde_yaml::to_string(&config).map_err(|e| ConfigGenerationError::Render(e.to_string()))
    }
}
