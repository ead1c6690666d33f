//! Layered configuration: built-in defaults, then an optional file, then
//! `QNET_ACTIVATION_*` environment variables.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use qnet_activation_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verification service base URL
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Target-network registry base URL
    #[serde(default = "default_network_url")]
    pub network_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            network_url: default_network_url(),
            request_timeout_secs: default_request_timeout_secs(),
            orchestrator: OrchestratorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_bridge_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_network_url() -> String {
    "http://localhost:9876".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CliConfig {
    /// Load configuration, reading `path` when given.
    ///
    /// Nested keys use `__` in environment variables, e.g.
    /// `QNET_ACTIVATION_ORCHESTRATOR__MONITOR__MAX_ATTEMPTS=10`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("QNET_ACTIVATION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(Config::builder().add_source(Config::try_from(&CliConfig::default())?))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(document: &str) -> CliConfig {
        CliConfig::defaults()
            .unwrap()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.bridge_url, "http://localhost:8080");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(!config.orchestrator.phase.honor_override);
    }

    #[test]
    fn test_defaults_survive_config_round_trip() {
        assert_eq!(from_toml(""), CliConfig::default());
    }

    #[test]
    fn test_file_overrides_nested_sections() {
        let config = from_toml(
            r#"
            bridge_url = "https://bridge.qnet.example"

            [orchestrator.monitor]
            max_attempts = 10

            [orchestrator.phase]
            honor_override = true

            [logging]
            json = true
            "#,
        );

        assert_eq!(config.bridge_url, "https://bridge.qnet.example");
        assert_eq!(config.network_url, "http://localhost:9876");
        assert_eq!(config.orchestrator.monitor.max_attempts, 10);
        assert_eq!(config.orchestrator.monitor.interval_ms, 5_000);
        assert!(config.orchestrator.phase.honor_override);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let missing = std::env::temp_dir().join("qnet-activation-missing-config.toml");
        assert!(CliConfig::load(Some(&missing)).is_err());
    }
}
