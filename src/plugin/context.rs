//! What plugin hooks can see during startup.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::net::connection::Connections;

/// Startup phase a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Before any listener is bound.
    BeforeServerStart,
    /// After every port is wired, before traffic is served.
    BeforeProcessStart,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::BeforeServerStart => "before_server_start",
            LifecyclePhase::BeforeProcessStart => "before_process_start",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup context passed to every hook.
#[derive(Clone)]
pub struct Context {
    config: Arc<ServerConfig>,
    connections: Connections,
    phase: LifecyclePhase,
}

impl Context {
    pub fn new(config: Arc<ServerConfig>, connections: Connections) -> Self {
        Self {
            config,
            connections,
            phase: LifecyclePhase::BeforeServerStart,
        }
    }

    pub(crate) fn with_phase(&self, phase: LifecyclePhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }
}
