//! Bindings configuration

use rtcbridge_core::config::{BridgeConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Core settings plus the factory and loopback engine sections
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindingsConfig {
    #[serde(flatten)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub factory: FactoryConfig,

    #[serde(default)]
    pub loopback: LoopbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactoryConfig {
    /// Largest payload `send` accepts, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_max_message_size() -> usize {
    256 * 1024
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopbackConfig {
    /// Network threads of the loopback engine
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// One-way delivery delay between paired channels
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_worker_threads() -> usize {
    2
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            latency_ms: 0,
        }
    }
}

impl LoopbackConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl BindingsConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults overridden from `RTCBRIDGE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = BindingsConfig::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.bridge.apply_env();
        if let Ok(size) = std::env::var("RTCBRIDGE_MAX_MESSAGE_SIZE") {
            if let Ok(s) = size.parse() {
                self.factory.max_message_size = s;
            }
        }
        if let Ok(workers) = std::env::var("RTCBRIDGE_LOOPBACK_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.loopback.worker_threads = w;
            }
        }
        if let Ok(latency) = std::env::var("RTCBRIDGE_LOOPBACK_LATENCY_MS") {
            if let Ok(l) = latency.parse() {
                self.loopback.latency_ms = l;
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BindingsConfig::default();
        assert_eq!(config.factory.max_message_size, 262144);
        assert_eq!(config.loopback.worker_threads, 2);
        assert_eq!(config.loopback.latency(), Duration::ZERO);
        assert_eq!(config.bridge.dispatch.drain_budget, 256);
    }

    #[test]
    fn test_core_sections_sit_at_the_top_level() {
        let config = BindingsConfig::from_toml(
            r#"
            [dispatch]
            drain_budget = 8

            [factory]
            max_message_size = 1024

            [loopback]
            latency_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.dispatch.drain_budget, 8);
        assert_eq!(config.factory.max_message_size, 1024);
        assert_eq!(config.loopback.latency_ms, 5);
        assert_eq!(config.loopback.worker_threads, 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loopback]\nworker_threads = 1").unwrap();
        let config = BindingsConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.loopback.worker_threads, 1);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result = BindingsConfig::from_toml("[factory]\nmax_message_size = \"big\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
