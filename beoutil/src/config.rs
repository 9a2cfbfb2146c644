use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEVICE_PORT;
use crate::topology::MergePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Browse window used when `--timeout` is not given
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Discovery cache file; `$HOME/.beoutil` when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Applies to single-shot requests only, never to the notification stream
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub policy: MergePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_decode_errors")]
    pub max_consecutive_decode_errors: usize,
    /// Pause before reopening a feed the product closed
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_discovery_timeout() -> u64 {
    5
}

fn default_port() -> u16 {
    DEVICE_PORT
}

fn default_request_timeout() -> u64 {
    5
}

fn default_max_decode_errors() -> usize {
    8
}

fn default_reconnect_delay() -> u64 {
    500
}

fn default_log_filter() -> String {
    "beoutil=info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_consecutive_decode_errors: default_max_decode_errors(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheConfig {
    /// Resolve the cache file location
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(home_dir()?.join(".beoutil")),
        }
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .context("HOME is not set")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load an explicitly requested file, or the default location if it exists.
    /// With neither, every setting takes its default.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = match home_dir() {
            Ok(home) => home.join(".config/beoutil/config.toml"),
            Err(_) => return Ok(Self::default()),
        };
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.device.port, 8080);
        assert_eq!(config.discovery.timeout_secs, 5);
        assert_eq!(config.stream.max_consecutive_decode_errors, 8);
        assert_eq!(config.stream.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.topology.policy, MergePolicy::FirstResponder);
        assert!(config.cache.path.is_none());
    }

    #[test]
    fn test_load_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [cache]
            path = "/tmp/products.json"

            [device]
            port = 9090

            [topology]
            policy = "prefer-online"

            [stream]
            max_consecutive_decode_errors = 2
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.device.port, 9090);
        assert_eq!(config.device.request_timeout_secs, 5);
        assert_eq!(config.topology.policy, MergePolicy::PreferOnline);
        assert_eq!(config.stream.max_consecutive_decode_errors, 2);
        assert_eq!(
            config.cache.resolve_path().unwrap(),
            PathBuf::from("/tmp/products.json")
        );
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load_or_default(Some(Path::new("/nonexistent/beoutil.toml"))).is_err());
    }
}
