//! Configuration module for selector-httpd.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::Protocol;
use crate::runtime::Framing;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "selector-httpd")]
#[command(author = "selector-httpd authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded selector-driven file and echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Bytes requested per read call
    #[arg(short = 'b', long)]
    pub chunk_size: Option<usize>,

    /// Maximum number of open connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Poll timeout in milliseconds (0 = busy poll)
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Protocol to serve
    #[arg(short = 'p', long, value_enum)]
    pub protocol: Option<Protocol>,

    /// How the end of a request is detected
    #[arg(short = 'f', long, value_enum)]
    pub framing: Option<Framing>,

    /// Directory files are served from
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// Honor the `close` command from non-loopback peers
    #[arg(long)]
    pub allow_remote_shutdown: bool,

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
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Capacity of the mio events buffer
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub framing: Framing,
    /// Upper bound on accumulated request bytes per connection
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            chunk_size: default_chunk_size(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            protocol: Protocol::default(),
            framing: Framing::default(),
            max_request_size: default_max_request_size(),
        }
    }
}

/// File serving configuration
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub allow_remote_shutdown: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            server_name: default_server_name(),
            allow_remote_shutdown: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_chunk_size() -> usize {
    1024
}

fn default_max_connections() -> usize {
    1024
}

fn default_batch_size() -> usize {
    256
}

fn default_poll_timeout_ms() -> u64 {
    10
}

fn default_max_request_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_server_name() -> String {
    "selector-httpd".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub chunk_size: usize,
    pub max_connections: usize,
    pub batch_size: usize,
    /// 0 turns the loop into a busy poll that pins one core.
    pub poll_timeout_ms: u64,
    pub protocol: Protocol,
    pub framing: Framing,
    pub max_request_size: usize,
    pub root: PathBuf,
    pub server_name: String,
    pub allow_remote_shutdown: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let config = Config {
            listen,
            chunk_size: cli.chunk_size.unwrap_or(toml_config.server.chunk_size),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            batch_size: toml_config.server.batch_size,
            poll_timeout_ms: cli
                .poll_timeout_ms
                .unwrap_or(toml_config.server.poll_timeout_ms),
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            framing: cli.framing.unwrap_or(toml_config.server.framing),
            max_request_size: toml_config.server.max_request_size,
            root: cli.root.unwrap_or(toml_config.http.root),
            server_name: toml_config.http.server_name,
            allow_remote_shutdown: cli.allow_remote_shutdown
                || toml_config.http.allow_remote_shutdown,
            log_level: if !cli.log_level.is_empty() && cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0"));
        }
        if self.max_request_size < self.chunk_size {
            return Err(ConfigError::Invalid(
                "max_request_size must be at least chunk_size",
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.chunk_size, 1024);
        assert_eq!(config.server.framing, Framing::BlankLine);
        assert_eq!(config.server.protocol, Protocol::Http);
        assert!(!config.http.allow_remote_shutdown);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            chunk_size = 100
            poll_timeout_ms = 0
            protocol = "echo"
            framing = "short-read"

            [http]
            root = "/srv/www"
            server_name = "test-server"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.chunk_size, 100);
        assert_eq!(config.server.poll_timeout_ms, 0);
        assert_eq!(config.server.protocol, Protocol::Echo);
        assert_eq!(config.server.framing, Framing::ShortRead);
        assert_eq!(config.http.root, PathBuf::from("/srv/www"));
        assert_eq!(config.http.server_name, "test-server");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs {
            listen: Some("127.0.0.1:1234".to_string()),
            chunk_size: Some(100),
            framing: Some(Framing::EndOfStream),
            log_level: "debug".to_string(),
            ..Default::default()
        };
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            chunk_size = 4096
            framing = "short-read"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:1234".parse().unwrap());
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.framing, Framing::EndOfStream);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = CliArgs {
            chunk_size: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let cli = CliArgs {
            listen: Some("not an address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidListen(_))
        ));
    }

    #[test]
    fn test_default_resolves() {
        let config = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.max_request_size, 64 * 1024);
        assert_eq!(config.server_name, "selector-httpd");
    }
}
