//! Configuration management for the AkiDB query node
//!
//! This module provides a centralized configuration system that supports:
//! - YAML/TOML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ids::NodeId;

/// Root configuration structure for a query node
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct QueryNodeConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl QueryNodeConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by AKIDB_QUERYNODE_CONFIG env var
    /// 3. ./config/querynode.yaml
    /// 4. /etc/akidb/querynode.yaml
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("AKIDB_QUERYNODE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/querynode").required(false))
            .add_source(File::with_name("/etc/akidb/querynode").required(false));

        // Example: AKIDB__QUERY__SYNC_WAIT_TIMEOUT_MS=500
        builder = builder.add_source(
            Environment::with_prefix("AKIDB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: QueryNodeConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("node.node_id", 1)?
            .set_default("scheduler.task_pool_size", 16)?
            .set_default("query.sync_wait_timeout_ms", 0)?
            .set_default("query.forward_timeout_ms", 5000)?
            .set_default("query.max_topk", 16384)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.node.node_id.is_valid() || self.node.node_id.get() <= 0 {
            return Err(ConfigError::Message(
                "node.node_id must be > 0".to_string(),
            ));
        }

        if self.scheduler.task_pool_size == 0 {
            return Err(ConfigError::Message(
                "scheduler.task_pool_size must be > 0".to_string(),
            ));
        }

        if self.query.max_topk == 0 {
            return Err(ConfigError::Message(
                "query.max_topk must be > 0".to_string(),
            ));
        }

        if self.query.forward_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "query.forward_timeout_ms must be > 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Message(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Message(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: QueryNodeConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Node identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Identity requests must carry as their target to be served here
    pub node_id: NodeId,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(1),
        }
    }
}

/// Task pool used for watch and load work
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently admitted watch/load tasks
    pub task_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { task_pool_size: 16 }
    }
}

/// Search/query fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// How long fan-out waits for an unsynced shard before skipping it (0 = never wait)
    pub sync_wait_timeout_ms: u64,

    /// Deadline applied to each forwarded sub-request
    pub forward_timeout_ms: u64,

    /// Upper bound accepted for a search's topk
    pub max_topk: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            sync_wait_timeout_ms: 0,
            forward_timeout_ms: 5000,
            max_topk: 16384,
        }
    }
}

impl QueryConfig {
    pub fn sync_wait_timeout(&self) -> Option<Duration> {
        (self.sync_wait_timeout_ms > 0).then(|| Duration::from_millis(self.sync_wait_timeout_ms))
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
