//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use portplex::config::{PortConfig, ServerConfig};
use portplex::http::{Frame, Request, Response};
use portplex::net::{
    ClientInfo, ConnectionId, Connections, HttpHandler, PortHandlers, ReactorId, TcpHandler, UdpHandler, WsHandler,
};
use portplex::{RunningServer, Server};

/// What a handler observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TcpConnect(ConnectionId),
    TcpReceive(ConnectionId, Bytes),
    TcpClose(ConnectionId),
    Udp(Bytes),
    Http(String),
    WsOpen(String),
    WsData(String),
    WsClose(u16),
}

/// Echoes on every family and records each callback.
pub struct Recorder {
    connections: Connections,
    events: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    fn record(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl TcpHandler for Recorder {
    async fn on_tcp_connect(&self, conn: ConnectionId, _reactor: ReactorId) {
        self.record(Event::TcpConnect(conn));
    }

    async fn on_tcp_close(&self, conn: ConnectionId, _reactor: ReactorId) {
        self.record(Event::TcpClose(conn));
    }

    async fn on_tcp_receive(&self, conn: ConnectionId, _reactor: ReactorId, data: Bytes) {
        self.record(Event::TcpReceive(conn, data.clone()));
        let _ = self.connections.send(conn, data).await;
    }
}

#[async_trait]
impl UdpHandler for Recorder {
    async fn on_udp_packet(&self, data: Bytes, client: ClientInfo) {
        self.record(Event::Udp(data.clone()));
        let _ = client.reply(&data).await;
    }
}

#[async_trait]
impl HttpHandler for Recorder {
    async fn on_http_request(&self, request: Request, response: &mut Response) {
        self.record(Event::Http(request.path().to_string()));
        response.write(format!("hello {}", request.path()));
    }
}

#[async_trait]
impl WsHandler for Recorder {
    async fn on_ws_open(&self, request: Request) {
        self.record(Event::WsOpen(request.path().to_string()));
    }

    async fn on_ws_message(&self, frame: Frame) {
        match frame {
            Frame::Data(data) => {
                let text = data.text().unwrap_or_default().to_string();
                self.record(Event::WsData(text.clone()));
                let _ = self.connections.push(data.conn, Message::text(text)).await;
            }
            Frame::Close(close) => self.record(Event::WsClose(close.code)),
        }
    }

    /// Only `/allowed` passes custom handshake ports.
    async fn on_ws_pass_custom_handshake(&self, request: &Request) -> bool {
        request.path() == "/allowed"
    }
}

/// A started server plus the events its handlers saw.
pub struct Harness {
    pub server: RunningServer,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn addr(&self, port: &str) -> SocketAddr {
        self.server.local_addr(port).expect("port bound")
    }

    /// Next event, failing the test after two seconds.
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    /// Assert nothing else arrives for a short while.
    pub async fn quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(extra.is_err(), "unexpected event: {:?}", extra);
    }
}

/// A recorder bound to `server`'s connections, wired for every family.
pub fn handlers(server: &Server) -> (PortHandlers, mpsc::UnboundedReceiver<Event>) {
    let (tx, events) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder {
        connections: server.connections(),
        events: tx,
    });
    (PortHandlers::all(recorder), events)
}

/// Start a server on `ports`, each wired to one shared recorder.
pub async fn start(config: ServerConfig) -> Harness {
    let names: Vec<String> = config.ports.iter().map(|p| p.name.clone()).collect();

    let mut server = Server::new(config).expect("valid config");
    let (handlers, events) = handlers(&server);
    for name in &names {
        server.handle(name, handlers.clone()).expect("known port");
    }

    Harness {
        server: server.start().await.expect("server starts"),
        events,
    }
}

pub fn config(ports: Vec<PortConfig>) -> ServerConfig {
    ServerConfig {
        ports,
        ..Default::default()
    }
}
