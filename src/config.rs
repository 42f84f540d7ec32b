//! Client Configuration
//!
//! This module provides configuration management for the client,
//! supporting YAML configuration files with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use log::{info, warn};

use crate::endpoint::{Capability, DEFAULT_ENGINES};
use crate::error::{ClientError, Result};
use crate::storage::config::BackendLayout;

const DEFAULT_CONFIG_FILE: &str = "client_config.yaml";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Engine id per capability
    pub endpoints: EndpointConfig,
    /// Retry loop configuration
    pub retry: RetryConfig,
    /// Storage backend configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Engine identifiers used for each capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub generate: String,
    pub inpaint: String,
    pub interpolate: String,
    pub transform: String,
    pub asset: String,
}

impl EndpointConfig {
    pub fn engine_for(&self, capability: Capability) -> &str {
        match capability {
            Capability::Generate => &self.generate,
            Capability::Inpaint => &self.inpaint,
            Capability::Interpolate => &self.interpolate,
            Capability::Transform => &self.transform,
            Capability::Asset => &self.asset,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let engine = |capability: Capability| {
            DEFAULT_ENGINES
                .get(&capability)
                .map(|id| id.to_string())
                .unwrap_or_default()
        };
        Self {
            generate: engine(Capability::Generate),
            inpaint: engine(Capability::Inpaint),
            interpolate: engine(Capability::Interpolate),
            transform: engine(Capability::Transform),
            asset: engine(Capability::Asset),
        }
    }
}

/// Retry loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in seconds, doubled on each attempt
    pub retry_delay_secs: f64,
    /// Resubmit with adjusted seeds on classifier obfuscation
    pub retry_obfuscation: bool,
    /// Schedule start shift applied on every obfuscation retry after the first
    pub retry_schedule_offset: f32,
    /// Run chains stage by stage on the client instead of server side
    pub debug_no_chains: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_secs: 1.0,
            retry_obfuscation: false,
            retry_schedule_offset: 0.1,
            debug_no_chains: false,
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backends are registered and which one holds each role
    pub layout: BackendLayout,
    /// Root directory of the local filesystem backend
    pub projects_root: String,
    /// Path of the persisted metadata index
    pub metadata_index_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            layout: BackendLayout::default(),
            projects_root: "projects".to_string(),
            metadata_index_path: "metadata_index.json".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
    /// Filter used when no log4rs file is present
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "client_log.yaml".to_string(),
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default file, use defaults if not found
    pub fn load() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::load_from(DEFAULT_CONFIG_FILE)
        } else {
            warn!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
