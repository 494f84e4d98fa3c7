//! Per-port event routing.
//!
//! # Responsibilities
//! - Check a port's configuration and handlers before any socket is touched
//! - Reuse the primary listener or create and configure a new one
//! - Wire exactly the event families the port speaks
//! - Forward raw listener events to the typed handler callbacks
//!
//! # Wiring
//! ```text
//! TCP        → connect, close, receive, buffer_full, buffer_empty
//! UDP        → packet
//! HTTP       → request
//! WebSocket  → message, open (+ handshake on custom handshake ports)
//! ```

use std::sync::Arc;

use axum::body::Bytes;

use crate::error::{ConfigurationError, ServerError};
use crate::http::frame::{Frame, RawFrame};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::websocket::{self, HandshakeEngine, HandshakeError};
use crate::net::connection::{ConnectionId, ReactorId};
use crate::net::handler::{ClientInfo, HttpHandler, PortHandlers, TcpHandler, UdpHandler, WsHandler};
use crate::net::listener::{Defer, ListenerHandle, ListenerHost};
use crate::net::port::{Port, ProtocolFamily};
use crate::observability::metrics;

/// Raw listener events a port can be wired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connect,
    Close,
    Receive,
    BufferFull,
    BufferEmpty,
    Packet,
    Request,
    Message,
    Open,
    Handshake,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Close => "close",
            EventKind::Receive => "receive",
            EventKind::BufferFull => "buffer_full",
            EventKind::BufferEmpty => "buffer_empty",
            EventKind::Packet => "packet",
            EventKind::Request => "request",
            EventKind::Message => "message",
            EventKind::Open => "open",
            EventKind::Handshake => "handshake",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The callbacks attached to one listener.
///
/// Events for families the port does not speak are dropped.
pub struct PortDispatch {
    port: Port,
    tcp: Option<Arc<dyn TcpHandler>>,
    udp: Option<Arc<dyn UdpHandler>>,
    http: Option<Arc<dyn HttpHandler>>,
    ws: Option<Arc<dyn WsHandler>>,
    engine: Option<HandshakeEngine>,
}

impl PortDispatch {
    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Whether `kind` reaches a handler on this port.
    pub fn handles(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Connect
            | EventKind::Close
            | EventKind::Receive
            | EventKind::BufferFull
            | EventKind::BufferEmpty => self.tcp.is_some(),
            EventKind::Packet => self.udp.is_some(),
            EventKind::Request => self.http.is_some(),
            EventKind::Message | EventKind::Open => self.ws.is_some(),
            EventKind::Handshake => self.engine.is_some(),
        }
    }

    /// Every event this port is wired for.
    pub fn wired(&self) -> Vec<EventKind> {
        [
            EventKind::Connect,
            EventKind::Close,
            EventKind::Receive,
            EventKind::BufferFull,
            EventKind::BufferEmpty,
            EventKind::Packet,
            EventKind::Request,
            EventKind::Message,
            EventKind::Open,
            EventKind::Handshake,
        ]
        .into_iter()
        .filter(|kind| self.handles(*kind))
        .collect()
    }

    fn unwired(&self, kind: EventKind) {
        tracing::trace!(port = %self.name(), event = %kind, "Event not wired on this port; dropped");
    }

    pub async fn connect(&self, conn: ConnectionId, reactor: ReactorId) {
        match &self.tcp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Connect.as_str());
                handler.on_tcp_connect(conn, reactor).await;
            }
            None => self.unwired(EventKind::Connect),
        }
    }

    pub async fn close(&self, conn: ConnectionId, reactor: ReactorId) {
        match &self.tcp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Close.as_str());
                handler.on_tcp_close(conn, reactor).await;
            }
            None => self.unwired(EventKind::Close),
        }
    }

    pub async fn receive(&self, conn: ConnectionId, reactor: ReactorId, data: Bytes) {
        match &self.tcp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Receive.as_str());
                handler.on_tcp_receive(conn, reactor, data).await;
            }
            None => self.unwired(EventKind::Receive),
        }
    }

    pub async fn buffer_full(&self, conn: ConnectionId) {
        match &self.tcp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::BufferFull.as_str());
                handler.on_tcp_buffer_full(conn).await;
            }
            None => self.unwired(EventKind::BufferFull),
        }
    }

    pub async fn buffer_empty(&self, conn: ConnectionId) {
        match &self.tcp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::BufferEmpty.as_str());
                handler.on_tcp_buffer_empty(conn).await;
            }
            None => self.unwired(EventKind::BufferEmpty),
        }
    }

    pub async fn packet(&self, data: Bytes, client: ClientInfo) {
        match &self.udp {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Packet.as_str());
                handler.on_udp_packet(data, client).await;
            }
            None => self.unwired(EventKind::Packet),
        }
    }

    /// Deliver a request. The response is ended afterwards if the handler left it open.
    pub async fn request(&self, request: Request, response: &mut Response) {
        match &self.http {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Request.as_str());
                handler.on_http_request(request, response).await;
            }
            None => self.unwired(EventKind::Request),
        }
        if !response.is_ended() {
            response.end();
        }
    }

    /// Deliver a frame, classified as data or close.
    pub async fn message(&self, raw: RawFrame) {
        match &self.ws {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Message.as_str());
                handler.on_ws_message(Frame::from(raw)).await;
            }
            None => self.unwired(EventKind::Message),
        }
    }

    pub async fn open(&self, request: Request) {
        match &self.ws {
            Some(handler) => {
                metrics::record_event(self.name(), EventKind::Open.as_str());
                handler.on_ws_open(request).await;
            }
            None => self.unwired(EventKind::Open),
        }
    }

    /// Answer an upgrade request.
    ///
    /// Custom handshake ports go through their [`HandshakeEngine`]. Other
    /// WebSocket ports use the built-in handshake, and `open` is deferred the
    /// same way.
    pub async fn handshake(
        &self,
        request: Request,
        response: &mut Response,
        defer: &dyn Defer,
    ) -> Result<(), HandshakeError> {
        if let Some(engine) = &self.engine {
            metrics::record_event(self.name(), EventKind::Handshake.as_str());
            return engine.handshake(request, response, defer).await;
        }

        let Some(handler) = &self.ws else {
            self.unwired(EventKind::Handshake);
            return Err(HandshakeError::NotWebSocket);
        };

        if let Err(e) = websocket::accept_upgrade(&request, response) {
            tracing::debug!(port = %self.name(), conn = %request.conn(), error = %e, "Upgrade refused");
            metrics::record_handshake(self.name(), e.outcome());
            return Err(e);
        }
        metrics::record_handshake(self.name(), "accepted");

        let handler = Arc::clone(handler);
        let port = self.name().to_string();
        defer.defer(Box::pin(async move {
            metrics::record_event(&port, EventKind::Open.as_str());
            handler.on_ws_open(request).await;
        }));
        Ok(())
    }
}

impl std::fmt::Debug for PortDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortDispatch")
            .field("port", &self.name())
            .field("wired", &self.wired())
            .finish()
    }
}

/// Turns one configured port into a live, wired listener.
pub struct PortEventRouter {
    port: Port,
    handlers: PortHandlers,
    dispatch: Option<Arc<PortDispatch>>,
}

impl PortEventRouter {
    pub fn new(port: Port, handlers: PortHandlers) -> Self {
        Self {
            port,
            handlers,
            dispatch: None,
        }
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn set_handlers(&mut self, handlers: PortHandlers) {
        self.handlers = handlers;
    }

    /// Dispatch attached by `create`, if it has run.
    pub fn dispatch(&self) -> Option<&Arc<PortDispatch>> {
        self.dispatch.as_ref()
    }

    /// Check configuration and handler presence, and build the dispatch.
    ///
    /// Touches no socket.
    pub fn prepare(&self) -> Result<PortDispatch, ConfigurationError> {
        self.port.check()?;

        let missing = |family| ConfigurationError::MissingHandler {
            port: self.port.name().to_string(),
            family,
        };

        let mut dispatch = PortDispatch {
            port: self.port.clone(),
            tcp: None,
            udp: None,
            http: None,
            ws: None,
            engine: None,
        };

        for family in self.port.families() {
            match family {
                ProtocolFamily::Tcp => {
                    dispatch.tcp = Some(self.handlers.tcp.clone().ok_or_else(|| missing(family))?);
                }
                ProtocolFamily::Udp => {
                    dispatch.udp = Some(self.handlers.udp.clone().ok_or_else(|| missing(family))?);
                }
                ProtocolFamily::Http => {
                    dispatch.http = Some(self.handlers.http.clone().ok_or_else(|| missing(family))?);
                }
                ProtocolFamily::WebSocket => {
                    let ws = self.handlers.ws.clone().ok_or_else(|| missing(family))?;
                    if self.port.is_custom_handshake() {
                        dispatch.engine = Some(HandshakeEngine::new(self.port.name(), Arc::clone(&ws)));
                    }
                    dispatch.ws = Some(ws);
                }
            }
        }

        Ok(dispatch)
    }

    /// Obtain a listener from `host` and attach this port's callbacks to it.
    ///
    /// The primary port reuses the host's primary listener; any other port
    /// gets a new listener configured from its own settings.
    pub fn create<H>(&mut self, host: &mut H) -> Result<ListenerHandle, ServerError>
    where
        H: ListenerHost + ?Sized,
    {
        if self.port.listener().is_some() {
            return Err(ConfigurationError::PortAlreadyCreated(self.port.name().to_string()).into());
        }

        let dispatch = Arc::new(self.prepare()?);
        let config = self.port.config();

        let handle = if self.port.is_primary() {
            host.primary()?
        } else {
            let handle = host.listen(&config.host, config.port, config.sock_type)?;
            host.configure(handle, &config.build_settings())?;
            handle
        };

        host.attach(handle, Arc::clone(&dispatch))?;
        tracing::info!(
            port = %self.port.name(),
            address = %config.address(),
            primary = self.port.is_primary(),
            events = ?dispatch.wired(),
            "Port created"
        );
        self.port.bind(handle);

        self.dispatch = Some(dispatch);
        Ok(handle)
    }
}
