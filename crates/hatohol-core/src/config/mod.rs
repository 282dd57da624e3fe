//! Configuration loading and validation.
//!
//! This module handles:
//! - Loading `hatohol.json`
//! - Config resolution order (CLI > env > XDG > defaults)
//! - Schema validation (shape/type checking via serde)
//! - Semantic validation (positive intervals, unique server ids)

pub mod validation;

pub use validation::{validate_config, ValidationError};

use std::path::{Path, PathBuf};

use hatohol_common::ServerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arm::{
    FailureKind, PollingTarget, SlotSpec, DEFAULT_POLLING_INTERVAL_SECS,
    DEFAULT_RETRY_INTERVAL_SECS,
};
use crate::incident::{RetryPolicy, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_RETRY_LIMIT};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "HATOHOL_CONFIG";

const CONFIG_DIR_NAME: &str = "hatohol";
const CONFIG_FILE_NAME: &str = "hatohol.json";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl From<ConfigError> for hatohol_common::Error {
    fn from(err: ConfigError) -> Self {
        hatohol_common::Error::Config(err.to_string())
    }
}

/// One polled monitoring server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArmConfig {
    pub server_id: ServerId,
    pub name: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Failure slots to track; all of them when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_slots: Option<Vec<FailureKind>>,
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

impl ArmConfig {
    pub fn new(server_id: ServerId, name: impl Into<String>) -> Self {
        Self {
            server_id,
            name: name.into(),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            failure_slots: None,
        }
    }

    pub fn target(&self) -> PollingTarget {
        PollingTarget::new(self.server_id, self.name.clone())
            .with_intervals(self.polling_interval_secs, self.retry_interval_secs)
    }

    pub fn slot_specs(&self) -> Vec<SlotSpec> {
        match &self.failure_slots {
            Some(kinds) => kinds.iter().map(|&k| SlotSpec::standard(k)).collect(),
            None => FailureKind::ALL.iter().map(|&k| SlotSpec::standard(k)).collect(),
        }
    }
}

/// Settings shared by every incident sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncidentSenderConfig {
    pub retry_limit: u32,
    pub retry_interval_ms: u64,
    pub record_history: bool,
}

impl Default for IncidentSenderConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            record_history: true,
        }
    }
}

impl IncidentSenderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: self.retry_limit,
            interval_ms: self.retry_interval_ms,
        }
    }
}

/// Top-level `hatohol.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HatoholConfig {
    pub schema_version: String,
    pub arms: Vec<ArmConfig>,
    pub incident_sender: IncidentSenderConfig,
}

impl Default for HatoholConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            arms: Vec::new(),
            incident_sender: IncidentSenderConfig::default(),
        }
    }
}

/// Where the loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Explicit,
    Environment,
    Xdg,
    Default,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub config: HatoholConfig,
    /// File the config was read from (None if using defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flag (via ConfigOptions)
/// 2. Environment variable (HATOHOL_CONFIG)
/// 3. XDG config home (~/.config/hatohol/hatohol.json)
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    load_config_from(
        options,
        std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from),
        dirs::config_dir(),
    )
}

/// [`load_config`] with the environment passed in.
pub fn load_config_from(
    options: &ConfigOptions,
    env_path: Option<PathBuf>,
    xdg_config_dir: Option<PathBuf>,
) -> Result<ResolvedConfig, ConfigError> {
    let (path, source) = if let Some(path) = &options.path {
        (path.clone(), ConfigSource::Explicit)
    } else if let Some(path) = env_path {
        (path, ConfigSource::Environment)
    } else {
        let candidate = xdg_config_dir.map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
        match candidate {
            Some(path) if path.exists() => (path, ConfigSource::Xdg),
            _ => {
                return Ok(ResolvedConfig {
                    config: HatoholConfig::default(),
                    path: None,
                    source: ConfigSource::Default,
                })
            }
        }
    };

    let config = load_config_file(&path)?;
    Ok(ResolvedConfig {
        config,
        path: Some(path),
        source,
    })
}

/// Read, parse and validate one config file.
pub fn load_config_file(path: &Path) -> Result<HatoholConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: HatoholConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version,
        });
    }

    validate_config(&config)?;
    Ok(config)
}
