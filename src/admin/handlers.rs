use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::lifecycle::startup::PortStatus;
use crate::net::connection::ConnectionInfo;
use crate::plugin::PluginStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub ports: usize,
    pub plugins: usize,
    pub connections: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        ports: state.config.ports.len(),
        plugins: state.plugins.len(),
        connections: state.connections.count(),
    })
}

pub async fn get_ports(State(state): State<AdminState>) -> Json<Vec<PortStatus>> {
    Json(state.ports.as_ref().clone())
}

pub async fn get_plugins(State(state): State<AdminState>) -> Json<Vec<PluginStatus>> {
    Json(state.plugins.statuses())
}

pub async fn get_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.connections.list())
}
