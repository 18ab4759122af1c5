//! Frame extraction from a connection's byte stream.
//!
//! Delimited mode yields one frame per delimiter byte, with a fresh read
//! deadline armed for every read. Stream mode yields a single frame holding
//! everything the peer sent before closing, bounded by one deadline per
//! read-to-close attempt. In both modes bytes received before a timeout stay
//! buffered and continue the same frame.

use crate::delimiter::ResolvedDelimiter;
use crate::runtime::connection::CloseSignal;
use std::fmt;
use std::future::Future;
use std::io;
use std::mem;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Why a connection stopped producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the connection.
    PeerClosed,
    /// The listener is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Shutdown => write!(f, "closed by shutdown"),
        }
    }
}

/// Outcome of a failed read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The read deadline passed. The connection stays usable.
    #[error("read timed out")]
    TimedOut,
    #[error("connection {0}")]
    Closed(CloseReason),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReadError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadError::TimedOut)
    }

    /// Whether this is an expected end of the connection rather than a fault.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            ReadError::Closed(_) => true,
            ReadError::Io(e) => is_closed_kind(e.kind()),
            ReadError::TimedOut => false,
        }
    }
}

pub(crate) fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Reads frames from one connection.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    delimiter: ResolvedDelimiter,
    read_timeout: Option<Duration>,
    /// Bytes of the frame currently being assembled.
    pending: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, delimiter: ResolvedDelimiter, read_timeout: Option<Duration>) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, reader),
            delimiter,
            read_timeout,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Read the next frame.
    ///
    /// A frame may be empty. Once the stream has ended every call returns
    /// `ReadError::Closed(CloseReason::PeerClosed)`.
    pub async fn read_frame(&mut self, close: &mut CloseSignal) -> Result<Vec<u8>, ReadError> {
        if self.eof {
            return Err(ReadError::Closed(CloseReason::PeerClosed));
        }
        match self.delimiter {
            ResolvedDelimiter::Byte(delimiter) => self.read_delimited(delimiter, close).await,
            ResolvedDelimiter::None => self.read_to_close(close).await,
        }
    }

    /// Bytes buffered for a frame that is not complete yet.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn deadline(&self) -> Option<Instant> {
        self.read_timeout.map(|timeout| Instant::now() + timeout)
    }

    async fn read_delimited(
        &mut self,
        delimiter: u8,
        close: &mut CloseSignal,
    ) -> Result<Vec<u8>, ReadError> {
        let deadline = self.deadline();
        let n = guarded(
            deadline,
            close,
            self.reader.read_until(delimiter, &mut self.pending),
        )
        .await?;

        if n > 0 && self.pending.last() == Some(&delimiter) {
            self.pending.pop();
            return Ok(mem::take(&mut self.pending));
        }

        // read_until stops short of the delimiter only at end of stream
        self.eof = true;
        if !self.pending.is_empty() {
            debug!(bytes = self.pending.len(), "Discarding unterminated frame");
            self.pending.clear();
        }
        Err(ReadError::Closed(CloseReason::PeerClosed))
    }

    async fn read_to_close(&mut self, close: &mut CloseSignal) -> Result<Vec<u8>, ReadError> {
        let deadline = self.deadline();
        loop {
            let n = guarded(deadline, close, self.reader.read_buf(&mut self.pending)).await?;
            if n == 0 {
                self.eof = true;
                return Ok(mem::take(&mut self.pending));
            }
        }
    }
}

/// Run one read, racing it against the deadline and the close signal.
async fn guarded<F, T>(
    deadline: Option<Instant>,
    close: &mut CloseSignal,
    read: F,
) -> Result<T, ReadError>
where
    F: Future<Output = io::Result<T>>,
{
    let read = async move {
        match deadline {
            Some(deadline) => match timeout_at(deadline, read).await {
                Ok(result) => result.map_err(ReadError::from),
                Err(_) => Err(ReadError::TimedOut),
            },
            None => read.await.map_err(ReadError::from),
        }
    };

    tokio::select! {
        biased;
        _ = close => Err(ReadError::Closed(CloseReason::Shutdown)),
        result = read => result,
    }
}
