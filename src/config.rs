//! Configuration module for hello-reactor.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::ParseMode;
use crate::runtime::Backend;
use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Unprivileged, non-ephemeral port range accepted for the listener.
pub const PORT_RANGE: RangeInclusive<u16> = 1024..=49151;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "hello-reactor")]
#[command(author = "hello-reactor authors")]
#[command(version = "0.1.0")]
#[command(about = "Non-blocking HELLO handshake server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (1024-49151)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Readiness backend
    #[arg(short, long, value_enum)]
    pub backend: Option<Backend>,

    /// Maximum number of simultaneous connections
    #[arg(short = 'n', long)]
    pub max_connections: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Upper bound on a single readiness poll, in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Sequence number parsing: lenient (atoi) or strict
    #[arg(long, value_enum)]
    pub parse_mode: Option<ParseMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and capacity configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend: Backend::default(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
        }
    }
}

/// Event loop timing
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Interval between stats reports in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Handshake protocol options
#[derive(Debug, Deserialize, Default)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub parse_mode: ParseMode,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_max_connections() -> usize {
    100
}

fn default_backlog() -> i32 {
    10
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_stats_interval_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub max_connections: usize,
    pub backlog: i32,
    pub poll_timeout_ms: u64,
    pub stats_interval_secs: u64,
    pub parse_mode: ParseMode,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve and validate configuration from already-parsed arguments.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backend: cli.backend.unwrap_or(toml_config.server.backend),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            poll_timeout_ms: cli
                .poll_timeout_ms
                .unwrap_or(toml_config.runtime.poll_timeout_ms),
            stats_interval_secs: toml_config.runtime.stats_interval_secs,
            parse_mode: cli.parse_mode.unwrap_or(toml_config.protocol.parse_mode),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Check every setting a listener depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ipv4_host()?;
        validate_port(self.port)?;

        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections", "must be at least 1"));
        }
        if self.backlog < 1 {
            return Err(ConfigError::invalid("backlog", "must be at least 1"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::invalid("poll_timeout_ms", "must be at least 1"));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::invalid("stats_interval_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::from((self.ipv4_host()?, self.port)))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    fn ipv4_host(&self) -> Result<Ipv4Addr, ConfigError> {
        self.host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))
    }
}

impl CliArgs {
    fn empty() -> Self {
        Self {
            config: None,
            host: None,
            port: None,
            backend: None,
            max_connections: None,
            backlog: None,
            poll_timeout_ms: None,
            parse_mode: None,
            log_level: default_log_level(),
        }
    }
}

/// Reject ports outside [`PORT_RANGE`].
pub fn validate_port(port: u16) -> Result<u16, ConfigError> {
    if PORT_RANGE.contains(&port) {
        Ok(port)
    } else {
        Err(ConfigError::InvalidPort(port))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("host '{0}' is not an IPv4 address")]
    InvalidHost(String),

    #[error("port {0} outside allowed range 1024-49151")]
    InvalidPort(u16),

    #[error("invalid {name}: {reason}")]
    InvalidSetting {
        name: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: &'static str) -> Self {
        ConfigError::InvalidSetting { name, reason }
    }
}
