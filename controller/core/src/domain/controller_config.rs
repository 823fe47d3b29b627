// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Defines the configuration schema for the Vela controller process:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Worker pool size (threadiness) and release name
// - Work queue retry backoff
// - Leader election lease timing
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_API_VERSION: &str = "vela.dev/v1";
pub const CONFIG_KIND: &str = "ControllerConfig";

/// Top-level Kubernetes-style controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigManifest {
    /// API version (must be "vela.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControllerConfigSpec,
}

/// Controller configuration is addressed by its manifest
pub type ControllerConfig = ControllerConfigManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigSpec {
    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub leader_election: LeaderElectionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Worker tasks per controller
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Release name, also the default leader election identity prefix
    #[serde(default = "default_release_name")]
    pub release_name: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            release_name: default_release_name(),
        }
    }
}

/// Exponential backoff applied to keys whose handlers failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderElectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Must be shorter than the lease duration
    #[serde(default = "default_renew_period_secs")]
    pub renew_period_secs: u64,

    /// Delay between acquisition attempts while standing by
    #[serde(default = "default_retry_period_secs")]
    pub retry_period_secs: u64,
}

impl LeaderElectionConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn renew_period(&self) -> Duration {
        Duration::from_secs(self.renew_period_secs)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_secs)
    }
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_name: default_lock_name(),
            lease_duration_secs: default_lease_duration_secs(),
            renew_period_secs: default_renew_period_secs(),
            retry_period_secs: default_retry_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Invalid log format '{}'. Expected text or json", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus exposition
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    2
}

fn default_release_name() -> String {
    "vela".to_string()
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_lock_name() -> String {
    "vela-controllers".to_string()
}

fn default_lease_duration_secs() -> u64 {
    15
}

fn default_renew_period_secs() -> u64 {
    5
}

fn default_retry_period_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ControllerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: CONFIG_API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ManifestMetadata {
                name: default_release_name(),
            },
            spec: ControllerConfigSpec::default(),
        }
    }
}

impl ControllerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. VELA_CONFIG_PATH environment variable
    /// 2. ./vela-config.yaml (working directory)
    /// 3. ~/.vela/config.yaml (user home)
    /// 4. /etc/vela/config.yaml (system, Unix) or C:\ProgramData\Vela\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("VELA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./vela-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vela").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/vela/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Vela\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VELA_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => {
                    tracing::info!("Environment override: VELA_WORKERS={}", workers);
                    self.spec.controller.workers = workers;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for VELA_WORKERS: '{}'. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("VELA_LOG_FORMAT") {
            match val.parse::<LogFormat>() {
                Ok(format) => self.spec.observability.log_format = format,
                Err(e) => tracing::warn!("{}. Ignoring VELA_LOG_FORMAT.", e),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != CONFIG_API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                CONFIG_API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.controller.workers == 0 {
            anyhow::bail!("spec.controller.workers must be at least 1");
        }

        let retry = &self.spec.retry;
        if retry.base_delay_ms == 0 || retry.base_delay_ms > retry.max_delay_ms {
            anyhow::bail!(
                "spec.retry.base_delay_ms ({}) must be positive and not exceed max_delay_ms ({})",
                retry.base_delay_ms,
                retry.max_delay_ms
            );
        }

        let election = &self.spec.leader_election;
        if election.enabled {
            if election.lock_name.is_empty() {
                anyhow::bail!("spec.leader_election.lock_name cannot be empty");
            }
            if election.renew_period_secs == 0
                || election.renew_period_secs >= election.lease_duration_secs
            {
                anyhow::bail!(
                    "spec.leader_election.renew_period_secs ({}) must be positive and \
                     shorter than lease_duration_secs ({})",
                    election.renew_period_secs,
                    election.lease_duration_secs
                );
            }
        }

        Ok(())
    }
}
