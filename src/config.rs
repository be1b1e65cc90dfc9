//! Configuration parsing and structures

use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::{AdapterOptions, DEFAULT_MAX_LIST_ENTRIES};
use crate::cache::DEFAULT_TTL;
use crate::env::substitute_env_vars;
use crate::resolver::DEFAULT_MAX_DEPTH;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// FTP listener and session settings
    pub server: RawServerConfig,

    /// Object store backing the filesystem
    pub backend: BackendConfig,

    /// Path resolution cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Filesystem limits
    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

/// Server section before the passive settings are parsed
#[derive(Debug, Clone, Deserialize)]
pub struct RawServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Drive folder path exposed as the FTP root
    #[serde(default = "default_root_path")]
    pub root_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Address advertised in PASV replies (defaults to the control socket's)
    pub passive_address: Option<String>,

    /// Passive data port range, `start-end`
    pub passive_ports: Option<String>,

    /// Sessions without a command for this long are closed
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Largest accepted STOR body in bytes; uploads are held in memory
    /// until the transfer completes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2121
}

fn default_root_path() -> String {
    "/".to_string()
}

fn default_max_connections() -> usize {
    256
}

fn default_max_connections_per_ip() -> usize {
    5
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_upload_size() -> u64 {
    512 * 1024 * 1024
}

/// Backend selection (tagged enum)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Google Drive
    #[serde(rename = "gdrive")]
    GDrive(GDriveBackendConfig),

    /// In-process store, contents are lost on exit
    Memory,
}

/// Google Drive backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GDriveBackendConfig {
    /// OAuth client secret JSON from the Google Cloud Console
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    /// Where the authorized credential is kept between runs
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Root folder ID in Google Drive
    #[serde(default = "default_root_folder_id")]
    pub root_folder_id: String,

    /// Use console code entry instead of a local browser redirect
    #[serde(default)]
    pub console_auth: bool,

    /// Upper bound on any single Drive call that carries no file content
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Upper bound on one file upload (create or overwrite)
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload_timeout: Duration,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_root_folder_id() -> String {
    "root".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(600)
}

/// Resolution cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> Duration {
    DEFAULT_TTL
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_TTL,
        }
    }
}

impl CacheConfig {
    /// TTL handed to the cache; zero when caching is off
    pub fn effective_ttl(&self) -> Duration {
        if self.enabled {
            self.ttl
        } else {
            Duration::ZERO
        }
    }
}

/// Filesystem limits
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_list_entries() -> usize {
    DEFAULT_MAX_LIST_ENTRIES
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
        }
    }
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub filesystem: FilesystemConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Server configuration (resolved)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub root_path: String,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub passive_address: Option<IpAddr>,
    pub passive_ports: Option<RangeInclusive<u16>>,
    pub idle_timeout: Duration,
    pub max_upload_size: u64,
}

impl ServerConfig {
    /// Listener address in `host:port` form
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, parsing the passive settings
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            server,
            backend,
            cache,
            filesystem,
        } = self;

        Ok(Config {
            logging,
            server: Self::resolve_server(server)?,
            backend,
            cache,
            filesystem,
        })
    }

    fn resolve_server(raw: RawServerConfig) -> Result<ServerConfig, ConfigError> {
        let passive_address = raw
            .passive_address
            .as_deref()
            .map(|addr| {
                addr.trim().parse::<IpAddr>().map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "server.passive_address is not an IP address: {}",
                        addr
                    ))
                })
            })
            .transpose()?;

        let passive_ports = raw
            .passive_ports
            .as_deref()
            .map(parse_port_range)
            .transpose()?;

        Ok(ServerConfig {
            host: raw.host,
            port: raw.port,
            username: raw.username,
            password: raw.password,
            root_path: raw.root_path,
            max_connections: raw.max_connections,
            max_connections_per_ip: raw.max_connections_per_ip,
            passive_address,
            passive_ports,
            idle_timeout: raw.idle_timeout,
            max_upload_size: raw.max_upload_size,
        })
    }
}

/// Parse a `start-end` port range
pub fn parse_port_range(value: &str) -> Result<RangeInclusive<u16>, ConfigError> {
    let invalid = || {
        ConfigError::ValidationError(format!(
            "server.passive_ports must look like 30000-30100, got {:?}",
            value
        ))
    };

    let (start, end) = value.trim().split_once('-').ok_or_else(invalid)?;
    let start: u16 = start.trim().parse().map_err(|_| invalid())?;
    let end: u16 = end.trim().parse().map_err(|_| invalid())?;
    if start == 0 || start > end {
        return Err(invalid());
    }
    Ok(start..=end)
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting environment
    /// references first
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be between 1 and 65535".to_string(),
            ));
        }
        if server.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.username cannot be empty".to_string(),
            ));
        }
        if server.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "server.password cannot be empty".to_string(),
            ));
        }
        if !server.root_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "server.root_path must be absolute: {:?}",
                server.root_path
            )));
        }
        if server.max_connections == 0 || server.max_connections_per_ip == 0 {
            return Err(ConfigError::ValidationError(
                "Connection limits must be at least 1".to_string(),
            ));
        }
        if server.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_upload_size must be at least 1".to_string(),
            ));
        }
        if self.filesystem.max_depth == 0 || self.filesystem.max_list_entries == 0 {
            return Err(ConfigError::ValidationError(
                "Filesystem limits must be at least 1".to_string(),
            ));
        }

        if let BackendConfig::GDrive(gdrive) = &self.backend {
            if !gdrive.credentials_path.exists() {
                return Err(ConfigError::ValidationError(format!(
                    "Credentials file not found: {:?}",
                    gdrive.credentials_path
                )));
            }
            if gdrive.root_folder_id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "backend.root_folder_id cannot be empty".to_string(),
                ));
            }
            if gdrive.request_timeout.is_zero() || gdrive.upload_timeout.is_zero() {
                return Err(ConfigError::ValidationError(
                    "backend timeouts must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Root object ID for the configured backend
    pub fn root_id(&self) -> String {
        match &self.backend {
            BackendConfig::GDrive(gdrive) => gdrive.root_folder_id.clone(),
            BackendConfig::Memory => "root".to_string(),
        }
    }

    /// Adapter settings derived from the cache and filesystem sections
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            root_id: self.root_id(),
            cache_ttl: self.cache.effective_ttl(),
            max_depth: self.filesystem.max_depth,
            max_list_entries: self.filesystem.max_list_entries,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
