//! portplex: multi-protocol port server library.
//!
//! Ports speak TCP, UDP, HTTP or WebSocket and route listener events to one
//! handler trait per protocol family. Plugins extend startup in a computed,
//! readiness-gated order.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod plugin;

pub use config::schema::ServerConfig;
pub use error::{ConfigurationError, PluginError, ServerError};
pub use lifecycle::{RunningServer, Server, Shutdown};
