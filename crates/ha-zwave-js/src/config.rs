//! Integration configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or
//! no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consts::{ADDON_SETUP_TIMEOUT, ADDON_SETUP_TIMEOUT_ROUNDS, SERVER_VERSION_TIMEOUT};
use crate::error::{ConfigError, ConfigResult};

/// Environment variable holding the supervisor bearer token
pub const SUPERVISOR_TOKEN_ENV: &str = "SUPERVISOR_TOKEN";

/// Supervisor connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_supervisor_url")]
    pub url: String,

    /// Bearer token, falls back to `SUPERVISOR_TOKEN`
    #[serde(default)]
    pub token: Option<String>,
}

fn default_supervisor_url() -> String {
    "http://supervisor".to_string()
}

/// Timeouts used by the flows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowTimeouts {
    /// Bound on one version probe
    pub server_version: Duration,
    /// Wait between polls after starting the add-on
    pub addon_setup: Duration,
    /// Number of polls before giving up on the add-on
    pub addon_setup_rounds: u32,
}

impl Default for FlowTimeouts {
    fn default() -> Self {
        Self {
            server_version: SERVER_VERSION_TIMEOUT,
            addon_setup: ADDON_SETUP_TIMEOUT,
            addon_setup_rounds: ADDON_SETUP_TIMEOUT_ROUNDS,
        }
    }
}

/// Z-Wave JS integration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZwaveJsConfig {
    /// Present when running under a supervisor
    pub supervisor: Option<SupervisorConfig>,

    /// Seconds
    pub server_version_timeout: f64,

    /// Seconds
    pub addon_setup_timeout: f64,

    pub addon_setup_timeout_rounds: u32,

    /// Directory holding `.storage/`
    pub config_dir: PathBuf,
}

impl Default for ZwaveJsConfig {
    fn default() -> Self {
        let timeouts = FlowTimeouts::default();
        Self {
            supervisor: None,
            server_version_timeout: timeouts.server_version.as_secs_f64(),
            addon_setup_timeout: timeouts.addon_setup.as_secs_f64(),
            addon_setup_timeout_rounds: timeouts.addon_setup_rounds,
            config_dir: PathBuf::from("."),
        }
    }
}

impl ZwaveJsConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("server_version_timeout", self.server_version_timeout),
            ("addon_setup_timeout", self.addon_setup_timeout),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected a non-negative number of seconds, got {}", value),
                });
            }
        }
        Ok(())
    }

    pub fn timeouts(&self) -> FlowTimeouts {
        FlowTimeouts {
            server_version: Duration::from_secs_f64(self.server_version_timeout),
            addon_setup: Duration::from_secs_f64(self.addon_setup_timeout),
            addon_setup_rounds: self.addon_setup_timeout_rounds,
        }
    }

    /// Supervisor token from the config file or the environment
    pub fn supervisor_token(&self) -> Option<String> {
        self.supervisor
            .as_ref()
            .and_then(|s| s.token.clone())
            .or_else(|| std::env::var(SUPERVISOR_TOKEN_ENV).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ZwaveJsConfig::from_yaml_str("").unwrap();
        assert!(config.supervisor.is_none());
        assert_eq!(config.timeouts(), FlowTimeouts::default());
        assert_eq!(config.timeouts().server_version, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_supervisor_and_timeouts() {
        let yaml = r#"
supervisor:
  token: abc
server_version_timeout: 0
addon_setup_timeout: 0.5
addon_setup_timeout_rounds: 2
config_dir: /config
"#;
        let config = ZwaveJsConfig::from_yaml_str(yaml).unwrap();
        let supervisor = config.supervisor.clone().unwrap();
        assert_eq!(supervisor.url, "http://supervisor");
        assert_eq!(config.supervisor_token().as_deref(), Some("abc"));

        let timeouts = config.timeouts();
        assert_eq!(timeouts.server_version, Duration::ZERO);
        assert_eq!(timeouts.addon_setup, Duration::from_millis(500));
        assert_eq!(timeouts.addon_setup_rounds, 2);
        assert_eq!(config.config_dir, PathBuf::from("/config"));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let result = ZwaveJsConfig::from_yaml_str("server_version_timeout: -1");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "server_version_timeout"
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ZwaveJsConfig::load("/nonexistent/zwave_js.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
