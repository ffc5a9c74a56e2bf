//! Configuration management for Hondana.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Hondana";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Outbound request settings.
    pub gateway: GatewayConfig,

    /// Shared cache settings.
    pub cache: CacheConfig,

    /// Upstream base URLs.
    pub sources: SourcesConfig,

    /// Log filter settings.
    pub logging: LoggingConfig,
}

/// Outbound request and circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Hard timeout for every upstream call, in seconds.
    pub request_timeout_sec: u64,

    /// Timeouts tolerated per host before requests are refused.
    pub failure_threshold: u32,

    /// Lifetime of a host's failure counter, refreshed on every timeout.
    pub failure_window_sec: u64,

    /// Base URL of the CORS relay. Relayed calls go direct when unset.
    pub relay_url: Option<String>,

    /// Value of the `source` query marker sent to the relay.
    pub relay_marker: String,

    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_sec: 8,
            failure_threshold: 25,
            failure_window_sec: 10 * 60,
            relay_url: None,
            relay_marker: "hondana_host".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:53.0) Gecko/20100101 Firefox/53.0".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_sec)
    }
}

/// Shared cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries kept in memory.
    pub max_capacity: u64,

    /// How long resolved scanlation group names are kept, in seconds.
    pub group_name_ttl_sec: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            group_name_ttl_sec: 60 * 60 * 24,
        }
    }
}

/// Base URLs of the supported upstream hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// MangaDex REST API.
    pub mangadex_api: String,

    /// MangaDex cover image host.
    pub mangadex_uploads: String,

    /// MangaDex website, used for original links.
    pub mangadex_site: String,

    /// WeebCentral website.
    pub weebcentral: String,

    /// ImageChest website.
    pub imgchest: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            mangadex_api: "https://api.mangadex.org".to_string(),
            mangadex_uploads: "https://uploads.mangadex.org".to_string(),
            mangadex_site: "https://mangadex.org".to_string(),
            weebcentral: "https://weebcentral.com".to_string(),
            imgchest: "https://imgchest.com".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hondana=info".to_string(),
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.request_timeout_sec == 0 {
            return Err(invalid("gateway.request_timeout_sec", "must be greater than 0"));
        }
        if self.gateway.failure_threshold == 0 {
            return Err(invalid("gateway.failure_threshold", "must be greater than 0"));
        }
        if self.gateway.failure_window_sec == 0 {
            return Err(invalid("gateway.failure_window_sec", "must be greater than 0"));
        }
        if self.cache.max_capacity == 0 {
            return Err(invalid("cache.max_capacity", "must be greater than 0"));
        }

        if let Some(relay) = &self.gateway.relay_url {
            check_url("gateway.relay_url", relay)?;
        }

        let sources = &self.sources;
        for (key, value) in [
            ("sources.mangadex_api", &sources.mangadex_api),
            ("sources.mangadex_uploads", &sources.mangadex_uploads),
            ("sources.mangadex_site", &sources.mangadex_site),
            ("sources.weebcentral", &sources.weebcentral),
            ("sources.imgchest", &sources.imgchest),
        ] {
            check_url(key, value)?;
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn check_url(key: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| invalid(key, &e.to_string()))
}
