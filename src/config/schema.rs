//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening ports. The first entry is the primary port.
    pub ports: Vec<PortConfig>,

    /// Plugin lifecycle settings.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl ServerConfig {
    /// The port whose listener is created together with the server.
    pub fn primary_port(&self) -> Option<&PortConfig> {
        self.ports.first()
    }

    /// Look up a port by name.
    pub fn port(&self, name: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.name == name)
    }
}

/// Socket family and transport of a listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    #[default]
    Tcp,
    Tcp6,
    Udp,
    Udp6,
}

impl SocketType {
    pub fn is_stream(self) -> bool {
        matches!(self, SocketType::Tcp | SocketType::Tcp6)
    }

    pub fn is_datagram(self) -> bool {
        matches!(self, SocketType::Udp | SocketType::Udp6)
    }

    pub fn is_ipv6(self) -> bool {
        matches!(self, SocketType::Tcp6 | SocketType::Udp6)
    }
}

impl std::fmt::Display for SocketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SocketType::Tcp => "tcp",
            SocketType::Tcp6 => "tcp6",
            SocketType::Udp => "udp",
            SocketType::Udp6 => "udp6",
        };
        f.write_str(s)
    }
}

/// A listening port and the protocols it speaks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    /// Port identifier used for handler registration, logs and metrics.
    pub name: String,

    /// Bind host (e.g., "0.0.0.0" or "::1").
    pub host: String,

    /// Bind port. 0 picks an ephemeral port.
    pub port: u16,

    /// Transport and address family.
    pub sock_type: SocketType,

    /// Speak HTTP/1.1 on this port.
    pub open_http_protocol: bool,

    /// Accept WebSocket upgrades on this port (implies HTTP).
    pub open_websocket_protocol: bool,

    /// Run the application's pre-handshake policy before upgrading.
    pub custom_handshake: bool,

    /// Listener tuning applied when the port is created.
    pub settings: ListenerSettings,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            host: "0.0.0.0".to_string(),
            port: 9501,
            sock_type: SocketType::Tcp,
            open_http_protocol: false,
            open_websocket_protocol: false,
            custom_handshake: false,
            settings: ListenerSettings::default(),
        }
    }
}

impl PortConfig {
    /// Create a plain TCP port.
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Create a UDP port.
    pub fn udp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            sock_type: SocketType::Udp,
            ..Self::tcp(name, host, port)
        }
    }

    /// Create an HTTP port.
    pub fn http(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            open_http_protocol: true,
            ..Self::tcp(name, host, port)
        }
    }

    /// Create a WebSocket port (HTTP upgrades included).
    pub fn websocket(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            open_http_protocol: true,
            open_websocket_protocol: true,
            ..Self::tcp(name, host, port)
        }
    }

    /// Enable the custom pre-handshake policy.
    pub fn with_custom_handshake(mut self) -> Self {
        self.custom_handshake = true;
        self
    }

    /// `host:port` as written in the config.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Settings handed to a freshly created listener.
    pub fn build_settings(&self) -> ListenerSettings {
        self.settings.clone()
    }
}

/// Per-listener tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Maximum concurrent connections (stream ports only).
    pub max_connections: usize,

    /// Outbound frames queued per connection before `buffer_full` fires.
    pub output_buffer_frames: usize,

    /// Read buffer size for stream reads and datagrams.
    pub read_buffer_bytes: usize,

    /// Maximum HTTP request body.
    pub max_body_bytes: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            output_buffer_frames: 64,
            read_buffer_bytes: 8 * 1024,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Plugin lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a plugin waits for its predecessor. 0 waits forever.
    pub plugin_ready_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            plugin_ready_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
