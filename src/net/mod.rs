//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig.ports
//!     → port.rs (classification: TCP / UDP / HTTP / WebSocket)
//!     → router.rs (handler checks, listener creation, event wiring)
//!     → listener.rs (host boundary, socket binding, connection limits)
//!     → tcp.rs / udp.rs / http::server (serving loops)
//!     → handler.rs (application callbacks)
//! ```
//!
//! # Design Decisions
//! - Every configuration error surfaces before the first bind
//! - Bounded accept (semaphore) on stream listeners
//! - Outbound writes go through a per-connection bounded queue

pub mod connection;
pub mod handler;
pub mod listener;
pub mod port;
pub mod router;
pub(crate) mod tcp;
pub(crate) mod udp;

pub use connection::{ConnectionId, Connections, ReactorId};
pub use handler::{ClientInfo, HttpHandler, PortHandlers, TcpHandler, UdpHandler, WsHandler};
pub use listener::{Defer, ListenerHandle, ListenerHost, TokioHost};
pub use port::{Port, ProtocolFamily};
pub use router::{EventKind, PortDispatch, PortEventRouter};
