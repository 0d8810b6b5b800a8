//! Configuration loading for chansync-server.
//!
//! Configuration is loaded from a TOML file (default: `chansync.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for chansync-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Key-value store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Pub/sub bridge configuration.
    #[serde(default)]
    pub pubsub: PubSubConfig,
    /// Redis connection, for the redis store and broker backends.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Maintenance task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-type schemas, keyed by record type.
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Path of the WebSocket endpoint (default: /ws).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Which key-value backend to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local in-memory store.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
    /// Redis server at `[redis] url`.
    Redis,
}

/// Key-value store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend (default: memory).
    #[serde(default)]
    pub backend: StoreBackend,
    /// Path to SQLite database file, for the sqlite backend.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Bound on every store round-trip in milliseconds (default: 5000).
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

/// Which broker fans notifications out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubBackend {
    /// In-process broker; notifications stay inside this process.
    #[default]
    Local,
    /// Redis PUBLISH/SUBSCRIBE at `[redis] url`; reaches every process
    /// connected to the same server.
    Redis,
}

/// Pub/sub bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Broker backend (default: local).
    #[serde(default)]
    pub backend: PubSubBackend,
    /// Forward broker subscribe/unsubscribe notices to channel members
    /// (default: false).
    #[serde(default)]
    pub announce_membership: bool,
    /// Capacity of the broker event buffer (default: 1024).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL (default: redis://127.0.0.1:6379).
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum requests per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum requests per second across all connections (default: 5000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Maximum size of one inbound frame in bytes (default: 1MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Outbound queue depth per connection (default: 256).
    /// Notifications for a full queue are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Interval in seconds between rate-limiter sweeps (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the maintenance task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Schema of one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TypeConfig {
    /// Sort-indexed properties.
    #[serde(default)]
    pub index_props: Vec<String>,
    /// External-key properties.
    #[serde(default)]
    pub ext_keys: Vec<String>,
    /// Properties sorted as text rather than numbers.
    #[serde(default)]
    pub text_props: Vec<String>,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("chansync.db")
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_event_buffer() -> usize {
    1024
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_requests_per_second() -> u32 {
    5000
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database: default_database_path(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            backend: PubSubBackend::default(),
            announce_membership: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Store round-trip bound as a [`std::time::Duration`].
    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store.timeout_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.pubsub.backend, PubSubBackend::Local);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.store.timeout_ms, 5000);
        assert!(!config.pubsub.announce_membership);
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
        assert!(config.types.is_empty());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
ws_path = "/sync"

[store]
backend = "sqlite"
database = "/data/chansync.db"
timeout_ms = 250

[pubsub]
announce_membership = true

[limits]
messages_per_minute = 60

[logging]
level = "chansync_server=debug"

[types.todo]
index_props = ["done"]
ext_keys = ["owner"]
text_props = ["content"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.server.ws_path, "/sync");
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.database, PathBuf::from("/data/chansync.db"));
        assert_eq!(config.store_timeout().as_millis(), 250);
        assert!(config.pubsub.announce_membership);
        assert_eq!(config.limits.messages_per_minute, 60);
        assert_eq!(config.logging.level, "chansync_server=debug");

        let todo = &config.types["todo"];
        assert_eq!(todo.index_props, vec!["done"]);
        assert_eq!(todo.ext_keys, vec!["owner"]);
        assert_eq!(todo.text_props, vec!["content"]);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.limits.outbound_buffer, 256);
        assert_eq!(config.pubsub.event_buffer, 1024);
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[server]
[store]
[limits]
[http]
[cleanup]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.database, PathBuf::from("chansync.db"));
        assert_eq!(config.cleanup.interval_secs, 300);
    }

    #[test]
    fn redis_backends_share_one_url() {
        let toml = r#"
[store]
backend = "redis"

[pubsub]
backend = "redis"

[redis]
url = "redis://cache:6380/2"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.pubsub.backend, PubSubBackend::Redis);
        assert_eq!(config.redis.url, "redis://cache:6380/2");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = toml::from_str::<Config>("[store]\nbackend = \"mongo\"\n");
        assert!(err.is_err());
        let err = toml::from_str::<Config>("[pubsub]\nbackend = \"kafka\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = 12").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));

        let missing = Config::from_file(std::path::Path::new("/nonexistent/chansync.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));
    }
}
