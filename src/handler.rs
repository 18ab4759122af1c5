//! Handler seam and the built-in handlers used by the binary.
//!
//! The trigger treats a handler as an opaque capability: it is given each
//! message and returns output fields, of which only `reply` is read.

use crate::error::{ConfigError, HandlerError};
use crate::message::{Fields, Message, Reply};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// A message handler.
///
/// Implementations must be re-entrant: connections are served concurrently
/// and share the same handler instances.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Fields, HandlerError>;
}

/// Ordered list of handlers invoked for every message.
pub type Handlers = Vec<Arc<dyn Handler>>;

/// Replies with the message payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, message: &Message) -> Result<Fields, HandlerError> {
        Ok(Reply {
            reply: message.data.clone(),
        }
        .to_fields())
    }
}

/// Logs the message and never replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, message: &Message) -> Result<Fields, HandlerError> {
        info!(data = %message.data, "Received message");
        Ok(Fields::new())
    }
}

/// Built-in handler selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Echo,
    Log,
}

impl HandlerKind {
    pub fn build(self) -> Arc<dyn Handler> {
        match self {
            HandlerKind::Echo => Arc::new(EchoHandler),
            HandlerKind::Log => Arc::new(LogHandler),
        }
    }
}

impl FromStr for HandlerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(HandlerKind::Echo),
            "log" => Ok(HandlerKind::Log),
            _ => Err(ConfigError::UnknownHandler(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_handler() {
        let fields = EchoHandler.handle(&Message::new("ping")).await.unwrap();
        assert_eq!(Reply::from_fields(&fields).unwrap().reply, "ping");
    }

    #[tokio::test]
    async fn test_log_handler_has_no_reply() {
        let fields = LogHandler.handle(&Message::new("ping")).await.unwrap();
        assert_eq!(Reply::from_fields(&fields).unwrap().reply, "");
    }

    #[test]
    fn test_handler_kind_from_str() {
        assert_eq!("echo".parse::<HandlerKind>().unwrap(), HandlerKind::Echo);
        assert_eq!("LOG".parse::<HandlerKind>().unwrap(), HandlerKind::Log);
        assert!(matches!(
            "flow".parse::<HandlerKind>(),
            Err(ConfigError::UnknownHandler(_))
        ));
    }
}
