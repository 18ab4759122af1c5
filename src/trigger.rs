//! TCP trigger lifecycle: bind, accept, shut down.
//!
//! `initialize` validates settings and binds the listening socket, `start`
//! spawns the accept loop on the current tokio runtime, and `stop` closes the
//! listener together with every tracked connection.

use crate::config::{ListenerConfig, Network};
use crate::delimiter;
use crate::error::TriggerError;
use crate::handler::Handlers;
use crate::runtime::{ConnectionRegistry, ListenerContext, Rejected, Worker};
use socket2::SockRef;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// What the host hands the trigger at initialization.
pub struct InitContext {
    handlers: Handlers,
    span: Span,
}

impl InitContext {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers,
            span: info_span!("tcpread"),
        }
    }

    /// Parent span for everything the trigger logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

enum State {
    Created,
    Bound(std::net::TcpListener),
    Running {
        shutdown: oneshot::Sender<()>,
        accept_loop: JoinHandle<()>,
    },
    Stopped,
}

/// A TCP listener that turns connection streams into handler invocations.
pub struct TcpTrigger {
    config: ListenerConfig,
    state: State,
    context: Option<Arc<ListenerContext>>,
    local_addr: Option<SocketAddr>,
    span: Span,
}

impl TcpTrigger {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            state: State::Created,
            context: None,
            local_addr: None,
            span: Span::none(),
        }
    }

    /// Validate settings and bind the listening socket.
    pub fn initialize(&mut self, ctx: InitContext) -> Result<(), TriggerError> {
        if !matches!(self.state, State::Created) {
            return Err(TriggerError::AlreadyInitialized);
        }
        let _entered = ctx.span.enter();

        let delimiter =
            delimiter::resolve(&self.config.custom_delimiter, &self.config.delimiter)?;
        let port = self.config.port()?;
        let network = self.config.network()?;

        let display_addr = format!("{}:{}", self.config.host, port);
        let (listener, local_addr) = resolve_addr(network, &self.config.host, port)
            .and_then(|addr| bind(network, addr))
            .and_then(|listener| {
                let local_addr = listener.local_addr()?;
                Ok((listener, local_addr))
            })
            .map_err(|source| TriggerError::Bind {
                addr: display_addr,
                source,
            })?;

        debug!(
            addr = %local_addr,
            delimiter = %delimiter,
            timeout_ms = self.config.timeout_ms,
            handlers = ctx.handlers.len(),
            "Listener bound"
        );

        self.context = Some(Arc::new(ListenerContext {
            handlers: ctx.handlers,
            delimiter,
            read_timeout: self.config.read_timeout(),
            registry: ConnectionRegistry::new(self.config.max_connections),
        }));
        self.local_addr = Some(local_addr);
        self.state = State::Bound(listener);
        drop(_entered);
        self.span = ctx.span;
        Ok(())
    }

    /// Spawn the accept loop. Returns immediately.
    pub fn start(&mut self) -> Result<(), TriggerError> {
        if self.is_running() {
            debug!("Listener already started");
            return Ok(());
        }
        let State::Bound(std_listener) = &self.state else {
            return Err(TriggerError::NotInitialized);
        };
        let context = match &self.context {
            Some(context) => Arc::clone(context),
            None => return Err(TriggerError::NotInitialized),
        };
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TriggerError::NoRuntime)?;

        // Register a duplicate so a failure leaves the bound listener in place
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener.try_clone()?)?
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_loop = runtime.spawn(
            accept_loop(listener, context, shutdown_rx).instrument(self.span.clone()),
        );
        // Drops the original listener; the accept loop owns the duplicate
        self.state = State::Running {
            shutdown,
            accept_loop,
        };

        self.span.in_scope(|| {
            info!(
                port = %self.config.port,
                network = %self.config.network,
                "Started listener"
            );
        });
        Ok(())
    }

    /// Close the listener and every tracked connection.
    ///
    /// Does not wait for connection workers to finish. Safe to call at any
    /// time and any number of times.
    pub fn stop(&mut self) -> Result<(), TriggerError> {
        let _entered = self.span.enter();

        // Stop accepting before draining, so no connection is registered
        // after the drain.
        let stopped = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running {
                shutdown,
                accept_loop,
            } => {
                let _ = shutdown.send(());
                accept_loop.abort();
                true
            }
            State::Bound(listener) => {
                drop(listener);
                true
            }
            State::Created => {
                self.state = State::Created;
                debug!("Stop called before initialize");
                false
            }
            State::Stopped => {
                debug!("Listener already stopped");
                false
            }
        };

        let closed = self
            .context
            .as_ref()
            .map(|context| context.registry.close_all())
            .unwrap_or(0);
        if stopped {
            info!(connections = closed, "Stopped listener");
        }
        Ok(())
    }

    /// Address the listener is bound to, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.context
            .as_ref()
            .map(|context| context.registry.len())
            .unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }
}

impl Drop for TcpTrigger {
    fn drop(&mut self) {
        if let State::Running { accept_loop, .. } = &self.state {
            accept_loop.abort();
        }
        if let Some(context) = &self.context {
            context.registry.close_all();
        }
    }
}

/// Accept connections until shutdown or a fatal accept error.
async fn accept_loop(
    listener: TcpListener,
    context: Arc<ListenerContext>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Accept loop stopped");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                return;
            }
        };

        let socket = match SockRef::from(&stream).try_clone() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to track connection, rejecting it");
                continue;
            }
        };
        let (id, close) = match context.registry.register(peer, socket) {
            Ok(registered) => registered,
            Err(Rejected::Full) => {
                warn!(
                    peer = %peer,
                    max_connections = context.registry.capacity(),
                    "Connection limit reached, rejecting connection"
                );
                continue;
            }
            Err(Rejected::Closed) => {
                debug!(peer = %peer, "Listener is stopping, rejecting connection");
                return;
            }
        };
        info!(peer = %peer, "Handling new connection from client");

        let (reader, writer) = stream.into_split();
        let worker = Worker::new(id, reader, writer, close, Arc::clone(&context));
        tokio::spawn(worker.run().instrument(info_span!("connection", peer = %peer, id)));
    }
}

/// Resolve the bind address for `network`. An empty host binds every
/// interface of the network's family.
fn resolve_addr(network: Network, host: &str, port: u16) -> io::Result<SocketAddr> {
    if host.is_empty() {
        return Ok(match network {
            Network::Tcp | Network::Tcp4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            Network::Tcp6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        });
    }

    (host, port)
        .to_socket_addrs()?
        .find(|addr| match network {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network:?} address found for host '{host}'"),
            )
        })
}

fn bind(network: Network, addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if network == Network::Tcp6 {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
