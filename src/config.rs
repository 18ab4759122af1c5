//! Configuration for the TCP trigger.
//!
//! `ListenerConfig` is the typed settings block consumed by the trigger. The
//! binary builds it from command-line arguments and an optional TOML file;
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use crate::handler::HandlerKind;
use crate::message::Fields;
use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Transport the listener binds with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// IPv4 or IPv6, whichever the host resolves to first.
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "" | "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(ConfigError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerConfig {
    /// Network type: tcp, tcp4 or tcp6
    pub network: String,
    /// Host name or IP to bind; empty binds all interfaces
    pub host: String,
    /// Port to listen on
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,
    /// Timeout for each read in milliseconds (0 = no timeout)
    pub timeout_ms: u64,
    /// Named delimiter, e.g. "Line Feed (LF)"
    pub delimiter: String,
    /// Hex-encoded delimiter, overrides `delimiter` when set
    pub custom_delimiter: String,
    /// Maximum tracked connections (0 = unlimited)
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            host: String::new(),
            port: String::new(),
            timeout_ms: 0,
            delimiter: String::new(),
            custom_delimiter: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl ListenerConfig {
    /// Decode settings supplied as a field mapping.
    pub fn from_fields(fields: Fields) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
    }

    /// Validated port number.
    pub fn port(&self) -> Result<u16, ConfigError> {
        let port = self.port.trim();
        if port.is_empty() {
            return Err(ConfigError::MissingPort);
        }
        port.parse()
            .map_err(|_| ConfigError::InvalidPort(self.port.clone()))
    }

    pub fn network(&self) -> Result<Network, ConfigError> {
        Network::parse(&self.network)
    }

    /// Per-read timeout, `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Text(String),
        Number(u64),
    }

    Ok(match Value::deserialize(deserializer)? {
        Value::Text(s) => s,
        Value::Number(n) => n.to_string(),
    })
}

fn default_network() -> String {
    "tcp".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line arguments for the listener
#[derive(Parser, Debug)]
#[command(name = "tcpread")]
#[command(version = "0.1.0")]
#[command(about = "Frame TCP streams into messages and dispatch them to handlers", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Network type (tcp, tcp4, tcp6)
    #[arg(long)]
    pub network: Option<String>,

    /// Host name or IP to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<String>,

    /// Read timeout in milliseconds (0 = no timeout)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Named delimiter: "Carriage Return (CR)", "Line Feed (LF)" or "Form Feed (FF)"
    #[arg(short, long)]
    pub delimiter: Option<String>,

    /// Hex-encoded custom delimiter (e.g. 7c for '|')
    #[arg(long)]
    pub custom_delimiter: Option<String>,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Handler to invoke for each message (echo, log); repeatable
    #[arg(long = "handler")]
    pub handlers: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One `[[handlers]]` entry
#[derive(Debug, Deserialize)]
pub struct HandlerConfig {
    pub kind: String,
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

/// Final resolved configuration for the binary
#[derive(Debug, Clone)]
pub struct Config {
    pub listener: ListenerConfig,
    pub handlers: Vec<HandlerKind>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge CLI args over the TOML file they point at, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|source| {
                ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                }
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let file = toml_config.listener;
        let listener = ListenerConfig {
            network: cli.network.unwrap_or(file.network),
            host: cli.host.unwrap_or(file.host),
            port: cli.port.unwrap_or(file.port),
            timeout_ms: cli.timeout_ms.unwrap_or(file.timeout_ms),
            delimiter: cli.delimiter.unwrap_or(file.delimiter),
            custom_delimiter: cli.custom_delimiter.unwrap_or(file.custom_delimiter),
            max_connections: cli.max_connections.unwrap_or(file.max_connections),
        };

        let names: Vec<String> = if !cli.handlers.is_empty() {
            cli.handlers
        } else if !toml_config.handlers.is_empty() {
            toml_config.handlers.into_iter().map(|h| h.kind).collect()
        } else {
            vec!["echo".to_string()]
        };
        let handlers = names
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<HandlerKind>, _>>()?;

        Ok(Config {
            listener,
            handlers,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}
