//! Engine configuration
//!
//! Loaded from TOML; every section and field has a default, so a partial
//! file only overrides what it names.

use crate::monitoring::LoggingConfig;
use crate::query::parser::DEFAULT_MAX_NESTING_DEPTH;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Query settings
    pub query: QuerySettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Maximum parenthesis nesting in filter expressions
    pub max_nesting_depth: usize,
    /// Match LIKE patterns ignoring case
    pub case_insensitive_like: bool,
    /// Largest accepted result limit
    pub max_result_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            case_insensitive_like: false,
            max_result_limit: 100_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        info!("Configuration loaded from {}", path.display());

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.query.max_nesting_depth == 0 {
            return Err(anyhow::anyhow!("Max nesting depth cannot be 0"));
        }

        if self.query.max_result_limit == 0 {
            return Err(anyhow::anyhow!("Max result limit cannot be 0"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(anyhow::anyhow!("Log level cannot be empty"));
        }

        Ok(())
    }
}
