//! Configuration for callbridge
//!
//! Loaded from a JSON file with every field defaulted, then overlaid with
//! `CALLBRIDGE_*` environment variables.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "callbridge_config.json";

/// Frames larger than this are refused whatever the configuration says
pub const MAX_FRAME_HARD_LIMIT: usize = 256 * 1024 * 1024;

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Bridge tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default `invoke` timeout in seconds (no timeout when unset)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Maximum number of concurrent callables on the worker pool
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Maximum size of one frame in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            max_concurrent_calls: default_max_concurrent_calls(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl BridgeConfig {
    /// Default `invoke` timeout as a Duration
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Set the default `invoke` timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Set the worker pool size
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Check the values are usable
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_concurrent_calls == 0 {
            return Err(BridgeError::config("max_concurrent_calls must be at least 1"));
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > MAX_FRAME_HARD_LIMIT {
            return Err(BridgeError::config(format!(
                "max_frame_bytes must be between 1 and {}",
                MAX_FRAME_HARD_LIMIT
            )));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(BridgeError::config("request_timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Where the UI side listens and the backend side connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl EndpointConfig {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from `path` if it exists, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file {:?} not found, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.bridge.validate()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| BridgeError::config(format!("failed to parse {:?}: {}", path, e)))
    }

    /// Overlay values from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> BridgeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CALLBRIDGE_TIMEOUT_SECS") {
            self.bridge.request_timeout_secs = Some(parse_env("CALLBRIDGE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CALLBRIDGE_MAX_CONCURRENT_CALLS") {
            self.bridge.max_concurrent_calls = parse_env("CALLBRIDGE_MAX_CONCURRENT_CALLS", &v)?;
        }
        if let Some(v) = lookup("CALLBRIDGE_MAX_FRAME_BYTES") {
            self.bridge.max_frame_bytes = parse_env("CALLBRIDGE_MAX_FRAME_BYTES", &v)?;
        }
        if let Some(v) = lookup("CALLBRIDGE_HOST") {
            self.endpoint.host = v;
        }
        if let Some(v) = lookup("CALLBRIDGE_PORT") {
            self.endpoint.port = parse_env("CALLBRIDGE_PORT", &v)?;
        }
        if let Some(v) = lookup("CALLBRIDGE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CALLBRIDGE_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> BridgeResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bridge.request_timeout(), None);
        assert_eq!(config.bridge.max_concurrent_calls, 16);
        assert_eq!(config.endpoint.address(), "127.0.0.1:8000");
        assert_eq!(config.logging.level, "info");
        assert!(config.bridge.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bridge": {{"request_timeout_secs": 5}}, "endpoint": {{"port": 9001}}}}"#)
            .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bridge.request_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.bridge.max_concurrent_calls, 16);
        assert_eq!(config.endpoint.host, "127.0.0.1");
        assert_eq!(config.endpoint.port, 9001);
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config.bridge.max_frame_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CALLBRIDGE_TIMEOUT_SECS", "30"),
            ("CALLBRIDGE_PORT", "8100"),
            ("CALLBRIDGE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bridge.request_timeout_secs, Some(30));
        assert_eq!(config.endpoint.port, 8100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "CALLBRIDGE_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CALLBRIDGE_PORT"));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = BridgeConfig::default().with_max_concurrent_calls(0);
        assert!(config.validate().is_err());

        let config = BridgeConfig {
            max_frame_bytes: MAX_FRAME_HARD_LIMIT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
