//! Ports and protocol classification.
//!
//! # Classification
//! ```text
//! is_http      = open_http_protocol || open_websocket_protocol
//! is_websocket = open_websocket_protocol
//! is_tcp       = !is_http && sock_type ∈ {tcp, tcp6}
//! is_udp       = sock_type ∈ {udp, udp6}
//! ```
//!
//! TCP and HTTP/WebSocket are mutually exclusive; UDP depends only on the
//! socket type.

use crate::config::schema::PortConfig;
use crate::config::validation::validate_port;
use crate::error::ConfigurationError;
use crate::net::listener::ListenerHandle;

/// A protocol family a port can be wired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Tcp,
    Udp,
    Http,
    WebSocket,
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolFamily::Tcp => "TCP",
            ProtocolFamily::Udp => "UDP",
            ProtocolFamily::Http => "HTTP",
            ProtocolFamily::WebSocket => "WebSocket",
        };
        f.write_str(s)
    }
}

/// A configured listening port.
#[derive(Debug, Clone)]
pub struct Port {
    config: PortConfig,
    primary: bool,
    listener: Option<ListenerHandle>,
}

impl Port {
    pub fn new(config: PortConfig, primary: bool) -> Self {
        Self {
            config,
            primary,
            listener: None,
        }
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether this port's listener is created together with the server.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Listener bound by `create`, if it has run.
    pub fn listener(&self) -> Option<ListenerHandle> {
        self.listener
    }

    pub(crate) fn bind(&mut self, handle: ListenerHandle) {
        self.listener = Some(handle);
    }

    pub fn is_tcp(&self) -> bool {
        !self.is_http() && self.config.sock_type.is_stream()
    }

    pub fn is_udp(&self) -> bool {
        self.config.sock_type.is_datagram()
    }

    pub fn is_http(&self) -> bool {
        self.config.open_http_protocol || self.config.open_websocket_protocol
    }

    pub fn is_websocket(&self) -> bool {
        self.config.open_websocket_protocol
    }

    pub fn is_custom_handshake(&self) -> bool {
        self.is_websocket() && self.config.custom_handshake
    }

    /// Families this port is wired for, in dispatch order.
    pub fn families(&self) -> Vec<ProtocolFamily> {
        let mut families = Vec::with_capacity(2);
        if self.is_tcp() {
            families.push(ProtocolFamily::Tcp);
        }
        if self.is_udp() {
            families.push(ProtocolFamily::Udp);
        }
        if self.is_http() {
            families.push(ProtocolFamily::Http);
        }
        if self.is_websocket() {
            families.push(ProtocolFamily::WebSocket);
        }
        families
    }

    /// Reject combinations no listener can serve.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        validate_port(&self.config).map_err(|errors| ConfigurationError::InvalidPort {
            port: self.config.name.clone(),
            reason: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SocketType;

    #[test]
    fn websocket_implies_http() {
        let mut config = PortConfig::tcp("ws", "127.0.0.1", 0);
        config.open_websocket_protocol = true;
        let port = Port::new(config, false);

        assert!(port.is_http());
        assert!(port.is_websocket());
        assert!(!port.is_tcp());
        assert_eq!(port.families(), vec![ProtocolFamily::Http, ProtocolFamily::WebSocket]);
    }

    #[test]
    fn plain_tcp_and_tcp6() {
        let port = Port::new(PortConfig::tcp("raw", "127.0.0.1", 0), true);
        assert!(port.is_tcp());
        assert!(!port.is_http());
        assert!(!port.is_udp());
        assert_eq!(port.families(), vec![ProtocolFamily::Tcp]);

        let mut v6 = PortConfig::tcp("raw6", "::1", 0);
        v6.sock_type = SocketType::Tcp6;
        assert!(Port::new(v6, false).is_tcp());
    }

    #[test]
    fn http_is_not_tcp() {
        let port = Port::new(PortConfig::http("api", "127.0.0.1", 0), false);
        assert!(!port.is_tcp());
        assert_eq!(port.families(), vec![ProtocolFamily::Http]);
    }

    #[test]
    fn udp_is_independent_of_flags() {
        let mut config = PortConfig::udp("game", "127.0.0.1", 0);
        let port = Port::new(config.clone(), false);
        assert_eq!(port.families(), vec![ProtocolFamily::Udp]);
        assert!(port.check().is_ok());

        config.open_websocket_protocol = true;
        let invalid = Port::new(config, false);
        assert!(invalid.is_udp());
        assert!(matches!(
            invalid.check(),
            Err(ConfigurationError::InvalidPort { port, .. }) if port == "game"
        ));
    }

    #[test]
    fn custom_handshake_only_counts_on_websocket_ports() {
        let ws = Port::new(
            PortConfig::websocket("ws", "127.0.0.1", 0).with_custom_handshake(),
            false,
        );
        assert!(ws.is_custom_handshake());

        let mut config = PortConfig::http("api", "127.0.0.1", 0);
        config.custom_handshake = true;
        assert!(!Port::new(config, false).is_custom_handshake());
    }
}
