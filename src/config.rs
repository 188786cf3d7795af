//! Bridge configuration, loaded from a TOML file with sane defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a discovery scan may run before giving up, in seconds.
    pub discovery_timeout_secs: u64,
    /// Simulator TCP host.
    pub sink_host: String,
    /// Simulator TCP port (GSPro Connect default).
    pub sink_port: u16,
    /// Override for the cloud authorization base URL (testing only).
    pub auth_base_url: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 30,
            sink_host: "127.0.0.1".to_string(),
            sink_port: 921,
            auth_base_url: None,
        }
    }
}

impl BridgeConfig {
    /// Location of the config file, if a platform config directory exists.
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "launchbridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the config file, falling back to defaults when it is missing
    /// or malformed (logged, never fatal).
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "bad config file, using defaults");
                Self::default()
            }),
            Err(_) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a TOML document into a config.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = BridgeConfig::default();
        assert_eq!(config.discovery_timeout_secs, 30);
        assert_eq!(config.sink_port, 921);
        assert!(config.auth_base_url.is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = BridgeConfig::from_toml("sink_port = 2483\n").unwrap();
        assert_eq!(config.sink_port, 2483);
        assert_eq!(config.sink_host, "127.0.0.1");
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(BridgeConfig::from_toml("sink_port = \"not a port\"").is_err());
    }
}
