//! Configuration management for Ferry.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/ferry/config.toml` |
//! | macOS | `~/Library/Application Support/Ferry/config.toml` |
//! | Windows | `%APPDATA%\Ferry\config.toml` |
//!
//! A missing file yields the defaults, and every section may be omitted.
//! Durations are written as `"2s"`, `"2100ms"` or `"1m"`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Uploading to {}", config.transfer.endpoint);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Ferry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transfer settings
    pub transfer: TransferConfig,
    /// Supervisor timing settings
    pub supervisor: SupervisorConfig,
    /// Durable store settings
    pub store: StoreConfig,
    /// Bus settings
    pub bus: BusConfig,
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Backend endpoint receiving the multipart POST
    pub endpoint: String,
    /// Size of the body chunks streamed to the backend
    pub chunk_size: usize,
    /// Timeout for a whole upload request (None for no timeout)
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,
    /// Treat HTTP error statuses like network failures (persist and retry)
    pub retry_http_errors: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::DEFAULT_ENDPOINT.to_string(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            request_timeout: None,
            retry_http_errors: false,
        }
    }
}

/// Supervisor configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long to wait for a heartbeat answer before reading the liveness flag
    #[serde(with = "humantime_serde")]
    pub heartbeat_grace: Duration,
    /// Delay before the liveness flag is reset after handing a retry to a live uploader
    #[serde(with = "humantime_serde")]
    pub liveness_reset_delay: Duration,
    /// Backoff between recovery trigger registration attempts
    #[serde(with = "humantime_serde")]
    pub registration_retry: Duration,
    /// Delay before a registered recovery trigger fires
    #[serde(with = "humantime_serde")]
    pub trigger_delay: Duration,
    /// Tag the recovery trigger is registered under
    pub retry_tag: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace: Duration::from_millis(crate::DEFAULT_HEARTBEAT_GRACE_MS),
            liveness_reset_delay: Duration::from_millis(crate::DEFAULT_LIVENESS_RESET_MS),
            registration_retry: Duration::from_millis(crate::DEFAULT_REGISTRATION_RETRY_MS),
            trigger_delay: Duration::from_secs(1),
            retry_tag: crate::RETRY_TAG.to_string(),
        }
    }
}

/// Durable store configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory (None for the platform data directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl StoreConfig {
    /// Directory the file store should use.
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(crate::store::FileStore::default_dir)
    }
}

/// Bus configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per endpoint before the oldest are dropped
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: crate::DEFAULT_BUS_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read,
    /// parsed or validated.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// Creates the parent directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Check values that would make the protocol misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, reason: &str) -> Error {
            Error::InvalidConfig {
                key: key.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.transfer.endpoint.trim().is_empty() {
            return Err(invalid("transfer.endpoint", "must not be empty"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size", "must be greater than zero"));
        }
        if self.supervisor.retry_tag.trim().is_empty() {
            return Err(invalid("supervisor.retry_tag", "must not be empty"));
        }
        if self.bus.capacity == 0 {
            return Err(invalid("bus.capacity", "must be greater than zero"));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ferry", "Ferry")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |n: &str| n.trim().parse::<u64>().map_err(|e| format!("{s:?}: {e}"));

        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            parse(mins).map(|m| Duration::from_secs(m * 60))
        } else {
            Err(format!("invalid duration format: {s:?}"))
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.transfer.endpoint, crate::DEFAULT_ENDPOINT);
        assert!(!config.transfer.retry_http_errors);
        assert_eq!(config.supervisor.heartbeat_grace, Duration::from_secs(2));
        assert_eq!(
            config.supervisor.liveness_reset_delay,
            Duration::from_millis(2100)
        );
        assert_eq!(config.supervisor.registration_retry, Duration::from_secs(10));
        assert_eq!(config.supervisor.retry_tag, "retryUpload");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config").join("config.toml");

        let mut original = Config::default();
        original.transfer.endpoint = "https://uploads.example.com/file".to_string();
        original.transfer.request_timeout = Some(Duration::from_secs(30));
        original.supervisor.heartbeat_grace = Duration::from_millis(1500);
        original.store.directory = Some(temp_dir.path().join("store"));

        original.save_to(&config_path).expect("save");
        let loaded = Config::load_from(&config_path).expect("load");

        assert_eq!(loaded.transfer.endpoint, "https://uploads.example.com/file");
        assert_eq!(loaded.transfer.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(loaded.supervisor.heartbeat_grace, Duration::from_millis(1500));
        assert_eq!(loaded.store.directory, Some(temp_dir.path().join("store")));
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[supervisor]
heartbeat_grace = "2100ms"
registration_retry = "1m"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.supervisor.heartbeat_grace, Duration::from_millis(2100));
        assert_eq!(config.supervisor.registration_retry, Duration::from_secs(60));
        assert_eq!(config.transfer.endpoint, crate::DEFAULT_ENDPOINT);
        assert_eq!(config.bus.capacity, crate::DEFAULT_BUS_CAPACITY);
    }

    #[test]
    fn test_humantime_duration_serialization() {
        let toml_str = Config::default().to_toml().expect("serialize");

        assert!(toml_str.contains("heartbeat_grace = \"2s\""));
        assert!(toml_str.contains("liveness_reset_delay = \"2100ms\""));
        assert!(toml_str.contains("[transfer]"));
        assert!(!toml_str.contains("request_timeout"));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[supervisor]\nheartbeat_grace = \"soon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "transfer.chunk_size"
        ));

        let mut config = Config::default();
        config.supervisor.retry_tag = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "supervisor.retry_tag"
        ));

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[bus]\ncapacity = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }
}
