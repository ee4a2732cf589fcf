//! Server configuration.
//!
//! Loaded from a TOML file passed with `--config`. A missing file yields the
//! defaults; every section and key is optional. CLI flags override file values
//! (see `main.rs`).
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 42071
//!
//! [storage]
//! data_dir = "/var/lib/mangahub"
//!
//! [source]
//! requests_per_second = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};
use crate::fs_utils;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the bundled web client (`index.html` + assets)
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    42071
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./assets")
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// On-disk locations. Unset paths are derived from `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub preferences: Option<PathBuf>,
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(fs_utils::get_data_base_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir().join("library.db"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("cache"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences
            .clone()
            .unwrap_or_else(|| self.data_dir().join("preferences.json"))
    }
}

/// Metadata source and asset upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_assets_url")]
    pub assets_url: String,

    /// GraphQL endpoint used for banner images
    #[serde(default = "default_anilist_url")]
    pub anilist_url: String,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.mangadex.org".to_string()
}

fn default_assets_url() -> String {
    "https://uploads.mangadex.org".to_string()
}

fn default_anilist_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            assets_url: default_assets_url(),
            anilist_url: default_anilist_url(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-connection heartbeat and queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Read deadline, extended on every pong
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,

    /// Maximum time a single frame write may take
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,

    /// Outbound queue capacity per connection
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_pong_wait_secs() -> u64 {
    60
}

fn default_write_wait_secs() -> u64 {
    10
}

fn default_outbound_capacity() -> usize {
    64
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl ConnectionConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Pings go out at 90% of the read deadline so a healthy peer always
    /// answers before it expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| HubError::Config {
            message: format!("Failed to parse config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| HubError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;
        fs_utils::write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.requests_per_second == 0 {
            return Err(HubError::Config {
                message: "source.requests_per_second must be at least 1".to_string(),
            });
        }
        if self.connection.outbound_capacity == 0 {
            return Err(HubError::Config {
                message: "connection.outbound_capacity must be at least 1".to_string(),
            });
        }
        if self.connection.pong_wait_secs == 0 {
            return Err(HubError::Config {
                message: "connection.pong_wait_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 42071);
        assert_eq!(config.source.requests_per_second, 5);
        assert_eq!(config.connection.ping_period(), Duration::from_secs(54));
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig::load_from(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.port, 42071);
    }

    #[test]
    fn test_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 8080\n\n[storage]\ndata_dir = \"/srv/manga\"\n",
        )
        .unwrap();

        let config = ServerConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/srv/manga/library.db")
        );
        assert_eq!(config.storage.cache_dir(), PathBuf::from("/srv/manga/cache"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[source]\nrequests_per_second = 0\n").unwrap();

        let err = ServerConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, HubError::Config { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");

        let mut config = ServerConfig::default();
        config.server.port = 9000;
        config.logging.level = "debug".to_string();
        config.save_to(&path).unwrap();

        let loaded = ServerConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.logging.level, "debug");
    }
}
