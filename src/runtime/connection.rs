//! Tracking set of live connections.
//!
//! The accept loop registers every accepted connection; the worker that owns
//! the stream removes its own entry when it finishes, and shutdown drains
//! whatever is left. Each entry holds a duplicate of the socket so shutdown
//! can close the connection while its worker is busy, plus a close signal
//! that wakes the worker at its next read or write.

use slab::Slab;
use socket2::Socket;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Receiving half of a connection's close signal, held by its worker.
pub type CloseSignal = oneshot::Receiver<()>;

/// Why a connection could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// The registry is at capacity.
    Full,
    /// The registry was closed by shutdown.
    Closed,
}

/// A tracked connection.
#[derive(Debug)]
pub struct Connection {
    /// Remote address of the peer.
    pub peer: SocketAddr,
    socket: Socket,
    close: oneshot::Sender<()>,
}

impl Connection {
    /// Shut the socket down in both directions and signal the owning worker.
    ///
    /// Failures are ignored: the peer may already be gone, and a worker that
    /// already exited has dropped its receiver.
    pub fn close(self) {
        let _ = self.socket.shutdown(Shutdown::Both);
        let _ = self.close.send(());
    }
}

#[derive(Debug)]
struct Inner {
    connections: Slab<Connection>,
    closed: bool,
}

/// Concurrency-safe registry of live connections keyed by slab id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry. `max_connections` of 0 means unlimited.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                connections: Slab::new(),
                closed: false,
            }),
            max_connections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection and hand back its id and close signal.
    ///
    /// `socket` must refer to the same socket as the worker's stream,
    /// typically a `try_clone` of it.
    pub fn register(
        &self,
        peer: SocketAddr,
        socket: Socket,
    ) -> Result<(usize, CloseSignal), Rejected> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Rejected::Closed);
        }
        if self.max_connections > 0 && inner.connections.len() >= self.max_connections {
            return Err(Rejected::Full);
        }
        let (tx, rx) = oneshot::channel();
        let id = inner.connections.insert(Connection {
            peer,
            socket,
            close: tx,
        });
        Ok((id, rx))
    }

    /// Remove a connection without closing it.
    ///
    /// Returns `None` if it was already removed, e.g. drained by shutdown.
    pub fn remove(&self, id: usize) -> Option<Connection> {
        self.lock().connections.try_remove(id)
    }

    /// Close and remove every tracked connection, and refuse new ones.
    ///
    /// Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.connections.drain().collect()
        };
        let count = drained.len();
        for conn in drained {
            conn.close();
        }
        count
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().connections.is_empty()
    }

    /// Maximum number of connections allowed, 0 for unlimited.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}

/// An unconnected socket, for registering connections that have no real
/// socket behind them.
#[cfg(test)]
pub(crate) fn detached_socket() -> Socket {
    Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap()
}
