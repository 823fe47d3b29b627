// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Serving Config Generation - translates a version's serving fields into the
// serving engine's native config. Version assignment never depends on it;
// only the `Configured` condition does.

use thiserror::Error;

use crate::domain::version::{ModelTemplateVersion, VersionSpecError};

pub trait ConfigGenerator: Send + Sync {
    /// Render the serving config for `version`.
    fn generate(&self, version: &ModelTemplateVersion) -> Result<String, ConfigGenerationError>;
}

#[derive(Debug, Error)]
pub enum ConfigGenerationError {
    #[error(transparent)]
    InvalidSpec(#[from] VersionSpecError),

    #[error("invalid mirror config: {0}")]
    InvalidMirrorConfig(String),

    #[error("failed to convert vLLMArgs, error: {0}")]
    InvalidEngineArgs(String),

    #[error("failed to convert to YAML config, error: {0}")]
    Render(String),
}
