//! Application-facing handler contract, one trait per protocol family.
//!
//! A port is wired to exactly the families its configuration selects
//! (see [`crate::net::port::Port::families`]); handlers for other families are
//! ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::net::UdpSocket;

use crate::http::frame::Frame;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::connection::{ConnectionId, ReactorId};

/// Plain TCP stream events.
#[async_trait]
pub trait TcpHandler: Send + Sync {
    async fn on_tcp_connect(&self, _conn: ConnectionId, _reactor: ReactorId) {}

    async fn on_tcp_close(&self, _conn: ConnectionId, _reactor: ReactorId) {}

    async fn on_tcp_receive(&self, conn: ConnectionId, reactor: ReactorId, data: Bytes);

    /// The connection's outbound queue filled up.
    async fn on_tcp_buffer_full(&self, _conn: ConnectionId) {}

    /// The outbound queue drained after being full.
    async fn on_tcp_buffer_empty(&self, _conn: ConnectionId) {}
}

/// Where a datagram came from, and how to answer it.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub peer: SocketAddr,
    pub local: SocketAddr,
    socket: Option<Arc<UdpSocket>>,
}

impl ClientInfo {
    pub fn new(peer: SocketAddr, local: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self {
            peer,
            local,
            socket: Some(socket),
        }
    }

    /// Client info with no socket attached; `reply` fails.
    pub fn detached(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            peer,
            local,
            socket: None,
        }
    }

    /// Send a datagram back to the peer.
    pub async fn reply(&self, data: &[u8]) -> std::io::Result<usize> {
        match &self.socket {
            Some(socket) => socket.send_to(data, self.peer).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "client info has no socket",
            )),
        }
    }
}

/// UDP datagram events.
#[async_trait]
pub trait UdpHandler: Send + Sync {
    async fn on_udp_packet(&self, data: Bytes, client: ClientInfo);
}

/// HTTP request events. Also required on WebSocket ports.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    /// Fill in `response`. It is ended automatically if the handler does not.
    async fn on_http_request(&self, request: Request, response: &mut Response);
}

/// WebSocket events.
#[async_trait]
pub trait WsHandler: Send + Sync {
    async fn on_ws_message(&self, frame: Frame);

    /// Runs after the `101` response has been flushed.
    async fn on_ws_open(&self, _request: Request) {}

    /// Pre-handshake policy, consulted only on custom handshake ports.
    async fn on_ws_pass_custom_handshake(&self, _request: &Request) -> bool {
        true
    }
}

/// Handlers supplied for one port. Families the port does not speak are ignored.
#[derive(Clone, Default)]
pub struct PortHandlers {
    pub(crate) tcp: Option<Arc<dyn TcpHandler>>,
    pub(crate) udp: Option<Arc<dyn UdpHandler>>,
    pub(crate) http: Option<Arc<dyn HttpHandler>>,
    pub(crate) ws: Option<Arc<dyn WsHandler>>,
}

impl PortHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tcp(mut self, handler: Arc<dyn TcpHandler>) -> Self {
        self.tcp = Some(handler);
        self
    }

    pub fn udp(mut self, handler: Arc<dyn UdpHandler>) -> Self {
        self.udp = Some(handler);
        self
    }

    pub fn http(mut self, handler: Arc<dyn HttpHandler>) -> Self {
        self.http = Some(handler);
        self
    }

    pub fn ws(mut self, handler: Arc<dyn WsHandler>) -> Self {
        self.ws = Some(handler);
        self
    }

    /// Use one object for every family it implements.
    pub fn all<H>(handler: Arc<H>) -> Self
    where
        H: TcpHandler + UdpHandler + HttpHandler + WsHandler + 'static,
    {
        Self {
            tcp: Some(handler.clone()),
            udp: Some(handler.clone()),
            http: Some(handler.clone()),
            ws: Some(handler),
        }
    }
}

impl std::fmt::Debug for PortHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandlers")
            .field("tcp", &self.tcp.is_some())
            .field("udp", &self.udp.is_some())
            .field("http", &self.http.is_some())
            .field("ws", &self.ws.is_some())
            .finish()
    }
}
