//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and hold per-port handlers
//! - Surface every configuration error before the first bind
//! - Run plugin phases around listener creation
//! - Spawn serving loops and the optional admin API
//!
//! # Sequence
//! ```text
//! resolve plugins → prepare every port → BeforeServerStart
//!     → bind primary → create every port → BeforeProcessStart
//!     → serve
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ServerConfig, SocketType};
use crate::error::{ConfigurationError, ServerError};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::Connections;
use crate::net::handler::PortHandlers;
use crate::net::listener::TokioHost;
use crate::net::port::{Port, ProtocolFamily};
use crate::net::router::{EventKind, PortEventRouter};
use crate::plugin::{Context, LifecyclePhase, PluginNode, PluginRegistry};

/// How long `shutdown` waits for serving loops to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A created port, as reported by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PortStatus {
    pub name: String,
    pub address: Option<SocketAddr>,
    pub sock_type: SocketType,
    pub primary: bool,
    pub families: Vec<ProtocolFamily>,
    pub events: Vec<EventKind>,
    pub custom_handshake: bool,
}

/// A configured server that has not started yet.
pub struct Server {
    config: Arc<ServerConfig>,
    routers: Vec<PortEventRouter>,
    plugins: PluginRegistry,
    connections: Connections,
    shutdown: Shutdown,
}

impl Server {
    /// Validate `config`. The first port is the primary port.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ConfigurationError::Invalid)?;

        let routers = config
            .ports
            .iter()
            .enumerate()
            .map(|(i, port)| PortEventRouter::new(Port::new(port.clone(), i == 0), PortHandlers::default()))
            .collect();

        let timeout = match config.lifecycle.plugin_ready_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            config: Arc::new(config),
            routers,
            plugins: PluginRegistry::new().with_ready_timeout(timeout),
            connections: Connections::new(),
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Supply the handlers for a configured port.
    pub fn handle(&mut self, port: &str, handlers: PortHandlers) -> Result<&mut Self, ConfigurationError> {
        let router = self
            .routers
            .iter_mut()
            .find(|r| r.port().name() == port)
            .ok_or_else(|| ConfigurationError::UnknownPort(port.to_string()))?;
        router.set_handlers(handlers);
        Ok(self)
    }

    pub fn register_plugin(&mut self, node: PluginNode) -> Result<usize, ConfigurationError> {
        self.plugins.register(node)
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    /// Registry handlers use to write to connections.
    pub fn connections(&self) -> Connections {
        self.connections.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Bring every port up.
    pub async fn start(mut self) -> Result<RunningServer, ServerError> {
        tracing::info!(ports = self.routers.len(), plugins = self.plugins.len(), "Server starting");

        // Configuration errors first: nothing has been bound yet.
        self.plugins.resolve()?;
        for router in &self.routers {
            router.prepare()?;
        }

        let ctx = Context::new(Arc::clone(&self.config), self.connections.clone());
        self.plugins.run(LifecyclePhase::BeforeServerStart, &ctx).await?;

        let primary = self
            .config
            .primary_port()
            .ok_or_else(|| ConfigurationError::Invalid(vec![ValidationError::NoPorts]))?;
        let mut host = TokioHost::with_primary(primary, self.connections.clone())?;

        let mut ports = Vec::with_capacity(self.routers.len());
        for router in &mut self.routers {
            let handle = router.create(&mut host)?;
            let port = router.port();
            ports.push(PortStatus {
                name: port.name().to_string(),
                address: host.local_addr(handle),
                sock_type: port.config().sock_type,
                primary: port.is_primary(),
                families: port.families(),
                events: router.dispatch().map(|d| d.wired()).unwrap_or_default(),
                custom_handshake: port.is_custom_handshake(),
            });
        }

        self.plugins.run(LifecyclePhase::BeforeProcessStart, &ctx).await?;

        // Last fallible step. Nothing is serving until it succeeds.
        let admin_listener = if self.config.admin.enabled {
            let listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let addr = listener.local_addr()?;
            Some((listener, addr))
        } else {
            None
        };

        let mut tasks = host.spawn(&self.shutdown);
        let ports = Arc::new(ports);
        let plugins = Arc::new(self.plugins);

        let admin_addr = if let Some((listener, addr)) = admin_listener {
            let router = setup_admin_router(AdminState {
                config: Arc::clone(&self.config),
                ports: Arc::clone(&ports),
                plugins: Arc::clone(&plugins),
                connections: self.connections.clone(),
                started_at: Instant::now(),
            });
            let mut stop = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { stop.wait().await })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            }));
            tracing::info!(address = %addr, "Admin API listening");
            Some(addr)
        } else {
            None
        };

        for port in ports.iter() {
            tracing::info!(
                port = %port.name,
                address = ?port.address,
                families = ?port.families,
                "Port serving"
            );
        }

        Ok(RunningServer {
            ports,
            plugins,
            connections: self.connections,
            shutdown: self.shutdown,
            tasks,
            admin_addr,
        })
    }
}

/// A started server.
pub struct RunningServer {
    ports: Arc<Vec<PortStatus>>,
    plugins: Arc<PluginRegistry>,
    connections: Connections,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    admin_addr: Option<SocketAddr>,
}

impl RunningServer {
    /// Address the named port is bound to.
    pub fn local_addr(&self, port: &str) -> Option<SocketAddr> {
        self.ports.iter().find(|p| p.name == port).and_then(|p| p.address)
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn ports(&self) -> &[PortStatus] {
        &self.ports
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn connections(&self) -> Connections {
        self.connections.clone()
    }

    /// Stop accepting, close live connections, and wait for serving loops.
    pub async fn shutdown(self) {
        tracing::info!(connections = self.connections.count(), "Server shutting down");
        self.shutdown.trigger();

        for task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Serving loop did not stop within grace period");
            }
        }

        tracing::info!("Shutdown complete");
    }
}
