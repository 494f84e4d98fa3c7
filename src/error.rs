//! Error taxonomy shared across subsystems.
//!
//! # Propagation
//! ```text
//! ConfigurationError  → fatal, surfaced before any port is activated
//! ListenerError       → fatal at startup (bind), logged per connection afterwards
//! PluginError         → aborts the lifecycle phase it occurred in
//! HandshakeError      → terminal for one upgrade attempt only (see http::websocket)
//! ```

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::net::listener::ListenerError;
use crate::net::port::ProtocolFamily;

/// Invalid port or plugin wiring. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<ValidationError>),

    #[error("port `{port}`: {reason}")]
    InvalidPort { port: String, reason: String },

    #[error("port `{port}` is {family} but no {family} handler was supplied")]
    MissingHandler { port: String, family: ProtocolFamily },

    #[error("unknown port `{0}`")]
    UnknownPort(String),

    #[error("port `{0}` has already been created")]
    PortAlreadyCreated(String),

    #[error("plugin `{0}` is already registered")]
    DuplicatePlugin(String),

    #[error("plugin `{plugin}` runs after `{after}`, which is not registered")]
    UnresolvedPredecessor { plugin: String, after: String },

    #[error("plugin dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("plugin index {0} does not refer to a registered plugin")]
    DanglingPredecessor(usize),
}

/// A plugin lifecycle hook failed or stalled.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin `{plugin}` failed during {phase}: {message}")]
    Hook {
        plugin: String,
        phase: &'static str,
        message: String,
    },

    #[error("plugin `{plugin}` timed out after {secs}s waiting for `{after}` to become ready")]
    ReadyTimeout {
        plugin: String,
        after: String,
        secs: u64,
    },

    #[error("plugin task panicked: {0}")]
    Panicked(String),
}

impl PluginError {
    /// Convenience constructor for hook implementations.
    pub fn hook(plugin: impl Into<String>, phase: &'static str, message: impl std::fmt::Display) -> Self {
        PluginError::Hook {
            plugin: plugin.into(),
            phase,
            message: message.to_string(),
        }
    }
}

/// Top-level error returned by server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
