//! Connection runtime.
//!
//! - `ConnectionRegistry`: tracking set of live connections
//! - `FrameReader`: delimiter or read-to-close framing with read deadlines
//! - `Worker`: per-connection read, dispatch and reply loop

pub mod connection;
pub mod framing;
pub mod worker;

pub use connection::{CloseSignal, ConnectionRegistry, Rejected};
pub use framing::{CloseReason, FrameReader, ReadError};
pub use worker::{dispatch, encode_replies, Worker};

use crate::delimiter::ResolvedDelimiter;
use crate::handler::Handlers;
use std::time::Duration;

/// State shared by the accept loop and every connection worker.
pub struct ListenerContext {
    pub handlers: Handlers,
    pub delimiter: ResolvedDelimiter,
    pub read_timeout: Option<Duration>,
    pub registry: ConnectionRegistry,
}
