//! tcpread: a TCP trigger.
//!
//! Turns each connection's byte stream into discrete messages and dispatches
//! every message to a list of handlers, writing their combined replies back
//! to the connection.
//!
//! Features:
//! - Framing on a single delimiter byte (CR, LF, FF or a custom hex value)
//!   or on connection close
//! - Per-read timeouts that keep idle connections open
//! - Fan-out to multiple handlers with reply aggregation
//! - Shutdown that closes the listener and every live connection
//!
//! ```no_run
//! use std::sync::Arc;
//! use tcpread::{EchoHandler, InitContext, ListenerConfig, TcpTrigger};
//!
//! # async fn run() -> Result<(), tcpread::TriggerError> {
//! let config = ListenerConfig {
//!     port: "8888".to_string(),
//!     delimiter: tcpread::delimiter::LINE_FEED.to_string(),
//!     ..ListenerConfig::default()
//! };
//! let mut trigger = TcpTrigger::new(config);
//! trigger.initialize(InitContext::new(vec![Arc::new(EchoHandler)]))?;
//! trigger.start()?;
//! // ...
//! trigger.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delimiter;
pub mod error;
pub mod handler;
pub mod message;
pub mod runtime;
pub mod trigger;

pub use config::ListenerConfig;
pub use delimiter::ResolvedDelimiter;
pub use error::{ConfigError, HandlerError, ReplyDecodeError, TriggerError};
pub use handler::{EchoHandler, Handler, Handlers, LogHandler};
pub use message::{Fields, Message, Reply};
pub use trigger::{InitContext, TcpTrigger};
