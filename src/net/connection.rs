//! Connection identity and the live-connection registry.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and handler calls
//! - Route outbound bytes / WebSocket messages to the owning connection task
//! - Track outbound queue depth (buffer full / buffer empty watermarks)
//! - Count active connections for the admin API and metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies the accept loop a connection was accepted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactorId(pub usize);

impl std::fmt::Display for ReactorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reactor-{}", self.0)
    }
}

/// What kind of stream a registered connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Tcp,
    WebSocket,
}

/// Outbound item queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Data(Bytes),
    Message(Message),
    Close,
}

/// Watermark and close notifications raised by the writer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    BufferFull,
    BufferEmpty,
    Closed,
}

/// Error type for connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{0} is not connected")]
    NotFound(ConnectionId),

    #[error("{0} is closing")]
    Closed(ConnectionId),

    #[error("{conn} is a {kind:?} connection")]
    WrongKind {
        conn: ConnectionId,
        kind: ConnectionKind,
    },
}

struct Entry {
    port: String,
    peer: SocketAddr,
    kind: ConnectionKind,
    outbound: mpsc::Sender<Outbound>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    congested: Arc<AtomicBool>,
}

/// Snapshot of one live connection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub port: String,
    pub peer: String,
    pub kind: ConnectionKind,
}

/// Channels handed to the connection task when it registers.
pub struct ConnectionChannels {
    pub outbound: mpsc::Receiver<Outbound>,
    pub signals: mpsc::UnboundedReceiver<ConnectionSignal>,
    pub watermark: Watermark,
    pub guard: ConnectionGuard,
}

/// Writer-side view of the congestion flag.
#[derive(Clone)]
pub struct Watermark {
    congested: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
}

impl Watermark {
    /// Called by the writer after a flush; reports `BufferEmpty` once per congestion.
    pub fn drained(&self, queue_empty: bool) {
        if queue_empty && self.congested.swap(false, Ordering::AcqRel) {
            let _ = self.signals.send(ConnectionSignal::BufferEmpty);
        }
    }

    /// Called by the writer after it has shut the stream down.
    pub fn closed(&self) {
        let _ = self.signals.send(ConnectionSignal::Closed);
    }
}

/// Registry of live connections, shared by handlers and listener tasks.
#[derive(Clone, Default)]
pub struct Connections {
    inner: Arc<DashMap<ConnectionId, Entry>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The returned guard unregisters it on drop.
    pub fn register(
        &self,
        conn: ConnectionId,
        port: &str,
        peer: SocketAddr,
        kind: ConnectionKind,
        capacity: usize,
    ) -> ConnectionChannels {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let congested = Arc::new(AtomicBool::new(false));

        self.inner.insert(
            conn,
            Entry {
                port: port.to_string(),
                peer,
                kind,
                outbound: outbound_tx,
                signals: signals_tx.clone(),
                congested: Arc::clone(&congested),
            },
        );
        metrics::record_active_connections(self.inner.len());
        tracing::trace!(conn = %conn, port = %port, peer = %peer, "Connection registered");

        ConnectionChannels {
            outbound: outbound_rx,
            signals: signals_rx,
            watermark: Watermark {
                congested,
                signals: signals_tx,
            },
            guard: ConnectionGuard {
                connections: self.clone(),
                id: conn,
            },
        }
    }

    /// Queue raw bytes on a TCP connection.
    ///
    /// When the queue is full this raises `BufferFull` and then waits for room.
    pub async fn send(&self, conn: ConnectionId, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.enqueue(conn, ConnectionKind::Tcp, Outbound::Data(data.into())).await
    }

    /// Queue a message on a WebSocket connection.
    pub async fn push(&self, conn: ConnectionId, message: Message) -> Result<(), ConnectionError> {
        self.enqueue(conn, ConnectionKind::WebSocket, Outbound::Message(message)).await
    }

    /// Ask the connection to close once queued output is flushed.
    pub async fn close(&self, conn: ConnectionId) -> Result<(), ConnectionError> {
        let sender = self
            .inner
            .get(&conn)
            .map(|e| e.outbound.clone())
            .ok_or(ConnectionError::NotFound(conn))?;
        sender.send(Outbound::Close).await.map_err(|_| ConnectionError::Closed(conn))
    }

    async fn enqueue(
        &self,
        conn: ConnectionId,
        expected: ConnectionKind,
        item: Outbound,
    ) -> Result<(), ConnectionError> {
        // Clone out of the map so no shard lock is held across an await.
        let (sender, signals, congested, kind) = {
            let entry = self.inner.get(&conn).ok_or(ConnectionError::NotFound(conn))?;
            (
                entry.outbound.clone(),
                entry.signals.clone(),
                Arc::clone(&entry.congested),
                entry.kind,
            )
        };

        if kind != expected {
            return Err(ConnectionError::WrongKind { conn, kind });
        }

        match sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectionError::Closed(conn)),
            Err(mpsc::error::TrySendError::Full(item)) => {
                if !congested.swap(true, Ordering::AcqRel) {
                    let _ = signals.send(ConnectionSignal::BufferFull);
                }
                sender.send(item).await.map_err(|_| ConnectionError::Closed(conn))
            }
        }
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.inner.contains_key(&conn)
    }

    /// Get current active connection count.
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Snapshot every live connection.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self
            .inner
            .iter()
            .map(|e| ConnectionInfo {
                id: e.key().as_u64(),
                port: e.port.clone(),
                peer: e.peer.to_string(),
                kind: e.kind,
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    fn remove(&self, conn: ConnectionId) {
        self.inner.remove(&conn);
        metrics::record_active_connections(self.inner.len());
    }
}

/// Guard that tracks a connection's registration.
/// Unregisters the connection when dropped.
pub struct ConnectionGuard {
    connections: Connections,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.remove(self.id);
        tracing::trace!(conn = %self.id, "Connection closed");
    }
}
