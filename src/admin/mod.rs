//! Admin API.
//!
//! Read-only JSON views of the running server, behind a bearer token.
//!
//! ```text
//! GET /admin/status       version, uptime, counts
//! GET /admin/ports        created ports and their wired events
//! GET /admin/plugins      plugins in startup order with readiness
//! GET /admin/connections  live TCP/WebSocket connections
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::ServerConfig;
use crate::lifecycle::startup::PortStatus;
use crate::net::connection::Connections;
use crate::plugin::PluginRegistry;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub config: Arc<ServerConfig>,
    pub ports: Arc<Vec<PortStatus>>,
    pub plugins: Arc<PluginRegistry>,
    pub connections: Connections,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/ports", get(get_ports))
        .route("/admin/plugins", get(get_plugins))
        .route("/admin/connections", get(get_connections))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
