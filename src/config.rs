//! Kernel Configuration
//!
//! Knobs that change CRUD and output behavior without touching field specs.
//! Loaded from JSON; every key is optional.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Output masking behavior for `sensitive` / `redact_last` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingMode {
    /// Redact masked fields in responses
    #[default]
    Redact,
    /// Leave responses untouched
    Off,
}

/// How `replace` treats replace-mutable fields missing from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    /// Keep the stored value
    #[default]
    Untouched,
    /// Reset to the static default, or null when nullable
    ResetToDefault,
}

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Page size for list when the caller gives none (default: unbounded)
    #[serde(default)]
    pub default_limit: Option<usize>,

    /// Upper bound on any list page (default: 1000)
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    #[serde(default)]
    pub masking: MaskingMode,

    /// Character used for redaction (default: '*')
    #[serde(default = "default_mask_char")]
    pub mask_char: char,

    #[serde(default)]
    pub replace_mode: ReplaceMode,
}

fn default_max_limit() -> usize {
    1000
}

fn default_mask_char() -> char {
    '*'
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_limit: None,
            max_limit: default_max_limit(),
            masking: MaskingMode::default(),
            mask_char: default_mask_char(),
            replace_mode: ReplaceMode::default(),
        }
    }
}

impl KernelConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::Invalid("max_limit must be positive".to_string()));
        }
        if let Some(limit) = self.default_limit {
            if limit > self.max_limit {
                return Err(ConfigError::Invalid(format!(
                    "default_limit {} exceeds max_limit {}",
                    limit, self.max_limit
                )));
            }
        }
        Ok(())
    }

    /// Effective page size for a requested limit
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.default_limit)
            .unwrap_or(self.max_limit)
            .min(self.max_limit)
    }
}
