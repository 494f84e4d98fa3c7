//! portplex: a multi-protocol port server.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                      PORTPLEX                         │
//!                    │                                                       │
//!   TCP / UDP /      │  ┌──────────┐   ┌─────────────┐   ┌───────────────┐  │
//!   HTTP / WS  ──────┼─▶│ listener │──▶│ PortDispatch│──▶│ typed handler │  │
//!   clients          │  │ (tokio)  │   │  (router)   │   │ Tcp/Udp/Http/ │  │
//!                    │  └──────────┘   └──────┬──────┘   │ Ws            │  │
//!                    │                        │          └───────────────┘  │
//!                    │                 ┌──────▼──────┐                      │
//!                    │                 │ handshake   │  (upgrade requests)  │
//!                    │                 └─────────────┘                      │
//!                    │                                                       │
//!                    │  ┌────────────────┐  ┌───────────┐  ┌─────────────┐  │
//!                    │  │ plugin registry│  │ lifecycle │  │ admin API / │  │
//!                    │  │ (ordered start)│  │ start/stop│  │ metrics     │  │
//!                    │  └────────────────┘  └───────────┘  └─────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! The binary serves every configured port with an echo handler.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderValue};
use clap::Parser;
use tokio_tungstenite::tungstenite::Message;

use portplex::config::loader::load_config;
use portplex::config::{PortConfig, ServerConfig};
use portplex::http::{Frame, Request, Response};
use portplex::lifecycle::signals::wait_for_signal;
use portplex::net::{
    ClientInfo, ConnectionId, Connections, HttpHandler, PortHandlers, ReactorId, TcpHandler, UdpHandler, WsHandler,
};
use portplex::observability::{logging, metrics};
use portplex::Server;

#[derive(Parser)]
#[command(name = "portplex", version, about = "Multi-protocol port server")]
struct Args {
    /// Path to a TOML configuration file. Without one, demo ports are served.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Demo ports: WebSocket (primary), raw TCP and UDP.
fn demo_config() -> ServerConfig {
    ServerConfig {
        ports: vec![
            PortConfig::websocket("main", "0.0.0.0", 9501),
            PortConfig::tcp("raw", "0.0.0.0", 9502),
            PortConfig::udp("datagram", "0.0.0.0", 9503),
        ],
        ..Default::default()
    }
}

/// Echoes whatever it receives, on every protocol family.
struct Echo {
    connections: Connections,
}

#[async_trait]
impl TcpHandler for Echo {
    async fn on_tcp_connect(&self, conn: ConnectionId, reactor: ReactorId) {
        tracing::info!(conn = %conn, reactor = %reactor, "TCP client connected");
    }

    async fn on_tcp_close(&self, conn: ConnectionId, _reactor: ReactorId) {
        tracing::info!(conn = %conn, "TCP client disconnected");
    }

    async fn on_tcp_receive(&self, conn: ConnectionId, _reactor: ReactorId, data: Bytes) {
        if let Err(e) = self.connections.send(conn, data).await {
            tracing::warn!(conn = %conn, error = %e, "Echo failed");
        }
    }
}

#[async_trait]
impl UdpHandler for Echo {
    async fn on_udp_packet(&self, data: Bytes, client: ClientInfo) {
        if let Err(e) = client.reply(&data).await {
            tracing::warn!(peer = %client.peer, error = %e, "UDP echo failed");
        }
    }
}

#[async_trait]
impl HttpHandler for Echo {
    async fn on_http_request(&self, request: Request, response: &mut Response) {
        response.header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response.write(format!("{} {}\n", request.method(), request.path()));
        response.end_with(request.body());
    }
}

#[async_trait]
impl WsHandler for Echo {
    async fn on_ws_open(&self, request: Request) {
        tracing::info!(conn = %request.conn(), path = %request.path(), "WebSocket client connected");
    }

    async fn on_ws_message(&self, frame: Frame) {
        let message = match &frame {
            Frame::Data(data) => match data.text() {
                Some(text) => Message::text(text),
                None => Message::Binary(data.payload.clone()),
            },
            Frame::Close(close) => {
                tracing::info!(conn = %close.conn, code = close.code, "WebSocket client closed");
                return;
            }
        };
        if let Err(e) = self.connections.push(frame.conn(), message).await {
            tracing::warn!(conn = %frame.conn(), error = %e, "Echo failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => demo_config(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portplex starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let port_names: Vec<String> = config.ports.iter().map(|p| p.name.clone()).collect();
    let mut server = Server::new(config)?;
    let echo = Arc::new(Echo {
        connections: server.connections(),
    });
    for name in &port_names {
        server.handle(name, PortHandlers::all(Arc::clone(&echo)))?;
    }

    let running = server.start().await?;
    for name in &port_names {
        if let Some(addr) = running.local_addr(name) {
            tracing::info!(port = %name, address = %addr, "Listening");
        }
    }

    wait_for_signal().await;
    running.shutdown().await;
    Ok(())
}
