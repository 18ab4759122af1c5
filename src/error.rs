//! Error types for configuration, lifecycle and handler invocation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing listener settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a valid port must be set")]
    MissingPort,

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("invalid custom delimiter '{value}': {source}")]
    InvalidCustomDelimiter {
        value: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("unsupported network '{0}' (expected tcp, tcp4 or tcp6)")]
    UnsupportedNetwork(String),

    #[error("failed to decode settings: {0}")]
    Fields(#[from] serde_json::Error),

    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown handler '{0}' (expected echo or log)")]
    UnknownHandler(String),
}

/// Lifecycle errors surfaced by the trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("trigger has not been initialized")]
    NotInitialized,

    #[error("trigger is already initialized")]
    AlreadyInitialized,

    #[error("start must be called from within a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure reported by a handler for a single message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

/// A handler result whose `reply` field cannot be read as text.
#[derive(Debug, Error)]
#[error("reply field has unsupported type {kind}")]
pub struct ReplyDecodeError {
    pub kind: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        assert_eq!(ConfigError::MissingPort.to_string(), "a valid port must be set");
        assert_eq!(
            ConfigError::InvalidPort("abc".into()).to_string(),
            "invalid port 'abc'"
        );
    }

    #[test]
    fn test_trigger_error_wraps_config() {
        let err: TriggerError = ConfigError::MissingPort.into();
        assert!(matches!(err, TriggerError::Config(ConfigError::MissingPort)));
        assert_eq!(err.to_string(), "a valid port must be set");
    }

    #[test]
    fn test_bind_error_keeps_source() {
        let err = TriggerError::Bind {
            addr: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().starts_with("failed to listen on 127.0.0.1:1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
