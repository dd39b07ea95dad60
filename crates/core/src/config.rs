//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the bridging core
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dispatch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Events a single loop may run per drain turn (0 = unbounded)
    #[serde(default = "default_drain_budget")]
    pub drain_budget: usize,
}

fn default_drain_budget() -> usize {
    256
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            drain_budget: default_drain_budget(),
        }
    }
}

/// Scripting engine limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_array_length")]
    pub max_array_length: usize,

    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,
}

fn default_max_array_length() -> usize {
    u32::MAX as usize
}

fn default_max_string_length() -> usize {
    (1 << 29) - 24
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_array_length: default_max_array_length(),
            max_string_length: default_max_string_length(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = BridgeConfig::default();
        config.apply_env();
        config
    }

    /// Override fields from `RTCBRIDGE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(budget) = std::env::var("RTCBRIDGE_DRAIN_BUDGET") {
            if let Ok(b) = budget.parse() {
                self.dispatch.drain_budget = b;
            }
        }
        if let Ok(len) = std::env::var("RTCBRIDGE_MAX_ARRAY_LENGTH") {
            if let Ok(l) = len.parse() {
                self.limits.max_array_length = l;
            }
        }
        if let Ok(len) = std::env::var("RTCBRIDGE_MAX_STRING_LENGTH") {
            if let Ok(l) = len.parse() {
                self.limits.max_string_length = l;
            }
        }
        if let Ok(filter) = std::env::var("RTCBRIDGE_LOG") {
            self.logging.filter = filter;
        }
        if let Ok(json) = std::env::var("RTCBRIDGE_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
