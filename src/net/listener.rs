//! Listener boundary and its tokio implementation.
//!
//! # Responsibilities
//! - Define what a port needs from the socket runtime (`ListenerHost`, `Defer`)
//! - Bind TCP/UDP sockets for each port (v4 or v6 per socket type)
//! - Enforce max_connections via semaphore on stream listeners
//! - Spawn one serving loop per listener once every port is wired
//!
//! # Data Flow
//! ```text
//! PortEventRouter::create
//!     → primary() | listen() + configure()
//!     → attach(PortDispatch)
//! TokioHost::spawn
//!     → net::tcp / net::udp / http::server loops → PortDispatch callbacks
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::schema::{ListenerSettings, PortConfig, SocketType};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{Connections, ReactorId};
use crate::net::router::PortDispatch;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot resolve {address} for {sock_type}")]
    Resolve { address: String, sock_type: SocketType },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("no primary listener has been created")]
    NoPrimary,

    #[error("unknown listener {0:?}")]
    UnknownHandle(ListenerHandle),
}

/// Opaque reference to a listener owned by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub usize);

/// Schedules work to run after the current callback has returned.
pub trait Defer: Send + Sync {
    fn defer(&self, task: BoxFuture<'static, ()>);
}

/// What a port needs from the socket runtime.
pub trait ListenerHost {
    /// The listener created together with the server for the primary port.
    fn primary(&mut self) -> Result<ListenerHandle, ListenerError>;

    /// Create an additional listener.
    fn listen(&mut self, host: &str, port: u16, sock_type: SocketType) -> Result<ListenerHandle, ListenerError>;

    /// Apply listener settings derived from the port configuration.
    fn configure(&mut self, handle: ListenerHandle, settings: &ListenerSettings) -> Result<(), ListenerError>;

    /// Route the listener's events to a port.
    fn attach(&mut self, handle: ListenerHandle, dispatch: Arc<PortDispatch>) -> Result<(), ListenerError>;
}

/// Deferred tasks for one upgraded connection, run once the 101 is flushed.
#[derive(Default)]
pub struct DeferQueue {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl DeferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every deferred task in scheduling order.
    pub async fn run(self) {
        let tasks = match self.tasks.into_inner() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks {
            task.await;
        }
    }
}

impl Defer for DeferQueue {
    fn defer(&self, task: BoxFuture<'static, ()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct StreamListener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl StreamListener {
    fn new(inner: TcpListener, max_connections: usize) -> Self {
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    fn set_max_connections(&mut self, max_connections: usize) {
        self.connection_limit = Arc::new(Semaphore::new(max_connections.max(1)));
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| {
                ListenerError::Accept(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection limit closed",
                ))
            })?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

enum BoundSocket {
    Stream(StreamListener),
    Datagram(Arc<UdpSocket>),
}

struct Bound {
    socket: BoundSocket,
    local_addr: SocketAddr,
    settings: ListenerSettings,
    dispatch: Option<Arc<PortDispatch>>,
}

/// Tokio-backed listener host.
pub struct TokioHost {
    listeners: Vec<Bound>,
    primary: Option<ListenerHandle>,
    connections: Connections,
}

impl TokioHost {
    /// A host with no primary listener.
    pub fn new(connections: Connections) -> Self {
        Self {
            listeners: Vec::new(),
            primary: None,
            connections,
        }
    }

    /// A host whose primary listener is bound and configured up front.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_primary(primary: &PortConfig, connections: Connections) -> Result<Self, ListenerError> {
        let mut host = Self::new(connections);
        let handle = host.bind(&primary.host, primary.port, primary.sock_type)?;
        host.configure(handle, &primary.build_settings())?;
        host.primary = Some(handle);
        Ok(host)
    }

    /// Address a listener actually bound to.
    pub fn local_addr(&self, handle: ListenerHandle) -> Option<SocketAddr> {
        self.listeners.get(handle.0).map(|b| b.local_addr)
    }

    fn bind(&mut self, host: &str, port: u16, sock_type: SocketType) -> Result<ListenerHandle, ListenerError> {
        let address = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?
            .find(|a| a.is_ipv6() == sock_type.is_ipv6())
            .ok_or_else(|| ListenerError::Resolve {
                address: address.clone(),
                sock_type,
            })?;

        let bind_err = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let settings = ListenerSettings::default();
        let (socket, local_addr) = if sock_type.is_stream() {
            let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
            std_listener.set_nonblocking(true).map_err(bind_err)?;
            let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
            let local_addr = listener.local_addr().map_err(bind_err)?;
            (
                BoundSocket::Stream(StreamListener::new(listener, settings.max_connections)),
                local_addr,
            )
        } else {
            let std_socket = std::net::UdpSocket::bind(addr).map_err(bind_err)?;
            std_socket.set_nonblocking(true).map_err(bind_err)?;
            let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;
            let local_addr = socket.local_addr().map_err(bind_err)?;
            (BoundSocket::Datagram(Arc::new(socket)), local_addr)
        };

        tracing::info!(address = %local_addr, sock_type = %sock_type, "Listener bound");

        self.listeners.push(Bound {
            socket,
            local_addr,
            settings,
            dispatch: None,
        });
        Ok(ListenerHandle(self.listeners.len() - 1))
    }

    fn get_mut(&mut self, handle: ListenerHandle) -> Result<&mut Bound, ListenerError> {
        self.listeners
            .get_mut(handle.0)
            .ok_or(ListenerError::UnknownHandle(handle))
    }

    /// Start serving every attached listener.
    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(self.listeners.len());

        for (index, bound) in self.listeners.into_iter().enumerate() {
            let Some(dispatch) = bound.dispatch else {
                tracing::warn!(address = %bound.local_addr, "Listener has no port attached; not serving");
                continue;
            };
            let reactor = ReactorId(index);
            let connections = self.connections.clone();
            let shutdown = shutdown.clone();

            let task = match bound.socket {
                BoundSocket::Stream(listener) if dispatch.port().is_http() => tokio::spawn(
                    crate::http::server::serve(listener, dispatch, bound.settings, connections, shutdown),
                ),
                BoundSocket::Stream(listener) => tokio::spawn(crate::net::tcp::serve(
                    listener,
                    dispatch,
                    bound.settings,
                    connections,
                    reactor,
                    shutdown,
                )),
                BoundSocket::Datagram(socket) => {
                    tokio::spawn(crate::net::udp::serve(socket, dispatch, bound.settings, shutdown))
                }
            };
            tasks.push(task);
        }

        tasks
    }
}

impl ListenerHost for TokioHost {
    fn primary(&mut self) -> Result<ListenerHandle, ListenerError> {
        self.primary.ok_or(ListenerError::NoPrimary)
    }

    fn listen(&mut self, host: &str, port: u16, sock_type: SocketType) -> Result<ListenerHandle, ListenerError> {
        self.bind(host, port, sock_type)
    }

    fn configure(&mut self, handle: ListenerHandle, settings: &ListenerSettings) -> Result<(), ListenerError> {
        let bound = self.get_mut(handle)?;
        if let BoundSocket::Stream(listener) = &mut bound.socket {
            listener.set_max_connections(settings.max_connections);
        }
        bound.settings = settings.clone();
        Ok(())
    }

    fn attach(&mut self, handle: ListenerHandle, dispatch: Arc<PortDispatch>) -> Result<(), ListenerError> {
        let bound = self.get_mut(handle)?;
        if bound.dispatch.is_some() {
            tracing::warn!(address = %bound.local_addr, port = %dispatch.name(), "Replacing attached port");
        }
        bound.dispatch = Some(dispatch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_is_bound_up_front() {
        let config = PortConfig::tcp("main", "127.0.0.1", 0);
        let mut host = TokioHost::with_primary(&config, Connections::new()).unwrap();

        let primary = host.primary().unwrap();
        let addr = host.local_addr(primary).unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn listen_binds_udp() {
        let mut host = TokioHost::new(Connections::new());
        assert!(matches!(host.primary(), Err(ListenerError::NoPrimary)));

        let handle = host.listen("127.0.0.1", 0, SocketType::Udp).unwrap();
        host.configure(handle, &ListenerSettings::default()).unwrap();
        assert!(host.local_addr(handle).is_some());
        assert!(matches!(
            host.configure(ListenerHandle(9), &ListenerSettings::default()),
            Err(ListenerError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn v6_socket_type_needs_v6_address() {
        let mut host = TokioHost::new(Connections::new());
        assert!(matches!(
            host.listen("127.0.0.1", 0, SocketType::Tcp6),
            Err(ListenerError::Resolve { .. })
        ));
    }

    #[tokio::test]
    async fn defer_queue_runs_in_order() {
        let queue = DeferQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            queue.defer(Box::pin(async move {
                log.lock().unwrap().push(i);
            }));
        }
        assert_eq!(queue.len(), 3);
        assert!(log.lock().unwrap().is_empty());

        queue.run().await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }
}
