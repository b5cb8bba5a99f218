//! Configuration module for the linelogd server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use crate::connection::HandlerSettings;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// The default port linelogd listens on
pub const DEFAULT_PORT: u16 = 9000;

/// The default listen backlog
pub const DEFAULT_BACKLOG: i32 = 10;

/// The default location of the shared log
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

/// The default record size limit (1 MiB)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Largest accepted receive buffer (16 MiB)
pub const MAX_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "linelogd")]
#[command(version)]
#[command(
    about = "Appends newline-delimited records from TCP clients to a shared log and replays the log to each sender",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Path of the shared log file
    #[arg(short = 'f', long)]
    pub data_file: Option<PathBuf>,

    /// Largest record accepted in bytes, delimiter included (0 = unbounded)
    #[arg(long)]
    pub max_record_size: Option<usize>,

    /// Size of each connection's receive buffer in bytes
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// How long a partial record may hold a connection open after shutdown
    #[arg(long)]
    pub drain_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write diagnostics to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default)]
    pub daemon: bool,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            daemon: false,
            read_buffer_size: default_read_buffer_size(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// 0 = unbounded
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            max_record_size: default_max_record_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_read_buffer_size() -> usize {
    crate::connection::handler::DEFAULT_READ_BUFFER_SIZE
}

fn default_drain_timeout_ms() -> u64 {
    crate::connection::handler::DEFAULT_DRAIN_TIMEOUT.as_millis() as u64
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

fn default_max_record_size() -> usize {
    DEFAULT_MAX_RECORD_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: bool,
    pub host: IpAddr,
    pub port: u16,
    pub backlog: i32,
    pub data_file: PathBuf,
    /// `None` = unbounded
    pub max_record_size: Option<usize>,
    pub read_buffer_size: usize,
    pub drain_timeout: Duration,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args against the optional TOML file.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::FileRead {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                    path: path.clone(),
                    source,
                })?
            }
            None => TomlConfig::default(),
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        let max_record_size = cli
            .max_record_size
            .unwrap_or(file.storage.max_record_size);

        Config {
            daemon: cli.daemon || file.server.daemon,
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            backlog: cli.backlog.unwrap_or(file.server.backlog),
            data_file: cli.data_file.unwrap_or(file.storage.data_file),
            max_record_size: (max_record_size > 0).then_some(max_record_size),
            read_buffer_size: cli
                .read_buffer_size
                .unwrap_or(file.server.read_buffer_size),
            drain_timeout: Duration::from_millis(
                cli.drain_timeout_ms
                    .unwrap_or(file.server.drain_timeout_ms),
            ),
            log_level: cli.log_level.unwrap_or(file.logging.level),
            log_file: cli.log_file.or(file.logging.file),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be positive"));
        }
        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::Invalid("read_buffer_size must be at most 16 MiB"));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive"));
        }
        Ok(())
    }

    /// Returns the bind address
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Per-connection settings derived from this configuration
    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            read_buffer_size: self.read_buffer_size,
            max_record_size: self.max_record_size,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.listen_addr(), "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.backlog, 10);
        assert_eq!(config.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.max_record_size, Some(1024 * 1024));
        assert_eq!(config.read_buffer_size, 1024);
        assert!(!config.daemon);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9100
            backlog = 5
            daemon = true
            drain_timeout_ms = 250

            [storage]
            data_file = "/tmp/records.log"
            max_record_size = 0

            [logging]
            level = "debug"
            file = "/tmp/linelogd.log"
        "#;

        let file: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(CliArgs::default(), file);

        assert_eq!(config.listen_addr(), "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.backlog, 5);
        assert!(config.daemon);
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.data_file, PathBuf::from("/tmp/records.log"));
        assert_eq!(config.max_record_size, None);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/linelogd.log")));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9100\n\n[storage]\nmax_record_size = 64").unwrap();

        let cli = CliArgs::parse_from([
            "linelogd",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "9200",
            "-d",
        ]);
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.port, 9200);
        assert_eq!(config.max_record_size, Some(64));
        assert!(config.daemon);
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["linelogd", "-c", "/nonexistent/linelogd.toml"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_malformed_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();

        let cli = CliArgs::parse_from(["linelogd", "-c", file.path().to_str().unwrap()]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::TomlParse { .. })
        ));
    }

    #[test]
    fn test_zero_read_buffer_rejected() {
        let cli = CliArgs::parse_from(["linelogd", "--read-buffer-size", "0"]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_huge_read_buffer_rejected() {
        let cli = CliArgs::parse_from(["linelogd", "--read-buffer-size", "1099511627776"]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::Invalid(_))));

        let limit = MAX_READ_BUFFER_SIZE.to_string();
        let cli = CliArgs::parse_from(["linelogd", "--read-buffer-size", limit.as_str()]);
        assert_eq!(Config::from_cli(cli).unwrap().read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_handler_settings() {
        let cli = CliArgs::parse_from([
            "linelogd",
            "--max-record-size",
            "0",
            "--drain-timeout-ms",
            "10",
        ]);
        let settings = Config::from_cli(cli).unwrap().handler_settings();
        assert_eq!(settings.max_record_size, None);
        assert_eq!(settings.drain_timeout, Duration::from_millis(10));
    }
}
