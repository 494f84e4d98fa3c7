//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject protocol combinations no listener can serve
//! - Detect duplicate port names and bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before any socket is touched

use std::collections::HashSet;
use std::net::IpAddr;

use thiserror::Error;

use crate::config::schema::{PortConfig, ServerConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no ports configured")]
    NoPorts,

    #[error("port #{0} has an empty name")]
    EmptyPortName(usize),

    #[error("port name `{0}` is used more than once")]
    DuplicatePortName(String),

    #[error("address {0} is bound by more than one port")]
    DuplicateAddress(String),

    #[error("port `{0}`: UDP sockets cannot speak HTTP or WebSocket")]
    DatagramWithHttp(String),

    #[error("port `{0}`: custom_handshake requires open_websocket_protocol")]
    HandshakeWithoutWebSocket(String),

    #[error("port `{port}`: host {host} does not match socket type {sock_type}")]
    AddressFamilyMismatch {
        port: String,
        host: String,
        sock_type: String,
    },

    #[error("port `{port}`: {field} must be greater than zero")]
    ZeroSetting { port: String, field: &'static str },
}

/// Validate a single port in isolation.
pub fn validate_port(port: &PortConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_port(port, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the whole configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ports.is_empty() {
        errors.push(ValidationError::NoPorts);
    }

    let mut names = HashSet::new();
    let mut addresses = HashSet::new();
    for (i, port) in config.ports.iter().enumerate() {
        if port.name.is_empty() {
            errors.push(ValidationError::EmptyPortName(i));
        } else if !names.insert(port.name.as_str()) {
            errors.push(ValidationError::DuplicatePortName(port.name.clone()));
        }

        // Port 0 is ephemeral; every bind gets its own number.
        if port.port != 0 {
            let key = (port.address(), port.sock_type.is_datagram());
            if !addresses.insert(key) {
                errors.push(ValidationError::DuplicateAddress(port.address()));
            }
        }

        check_port(port, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_port(port: &PortConfig, errors: &mut Vec<ValidationError>) {
    if port.sock_type.is_datagram() && (port.open_http_protocol || port.open_websocket_protocol) {
        errors.push(ValidationError::DatagramWithHttp(port.name.clone()));
    }

    if port.custom_handshake && !port.open_websocket_protocol {
        errors.push(ValidationError::HandshakeWithoutWebSocket(port.name.clone()));
    }

    if let Ok(ip) = port.host.parse::<IpAddr>() {
        if ip.is_ipv6() != port.sock_type.is_ipv6() {
            errors.push(ValidationError::AddressFamilyMismatch {
                port: port.name.clone(),
                host: port.host.clone(),
                sock_type: port.sock_type.to_string(),
            });
        }
    }

    let settings = &port.settings;
    for (field, value) in [
        ("max_connections", settings.max_connections),
        ("output_buffer_frames", settings.output_buffer_frames),
        ("read_buffer_bytes", settings.read_buffer_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroSetting {
                port: port.name.clone(),
                field,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SocketType;

    #[test]
    fn empty_config_is_rejected() {
        let errors = validate_config(&ServerConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoPorts]);
    }

    #[test]
    fn udp_with_websocket_is_rejected() {
        let mut port = PortConfig::udp("game", "127.0.0.1", 9502);
        port.open_websocket_protocol = true;
        let errors = validate_port(&port).unwrap_err();
        assert!(errors.contains(&ValidationError::DatagramWithHttp("game".into())));
    }

    #[test]
    fn websocket_without_http_flag_is_accepted() {
        let mut port = PortConfig::tcp("ws", "127.0.0.1", 9503);
        port.open_websocket_protocol = true;
        assert!(validate_port(&port).is_ok());
    }

    #[test]
    fn custom_handshake_needs_websocket() {
        let port = PortConfig::http("api", "127.0.0.1", 9504).with_custom_handshake();
        let errors = validate_port(&port).unwrap_err();
        assert_eq!(errors, vec![ValidationError::HandshakeWithoutWebSocket("api".into())]);
    }

    #[test]
    fn reports_every_error() {
        let mut config = ServerConfig::default();
        config.ports.push(PortConfig::tcp("a", "127.0.0.1", 9000));
        config.ports.push(PortConfig::tcp("a", "127.0.0.1", 9000));
        let mut v6 = PortConfig::tcp("b", "127.0.0.1", 9001);
        v6.sock_type = SocketType::Tcp6;
        config.ports.push(v6);

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicatePortName("a".into())));
        assert!(errors.contains(&ValidationError::DuplicateAddress("127.0.0.1:9000".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::AddressFamilyMismatch { port, .. } if port == "b")));
    }

    #[test]
    fn ephemeral_ports_may_repeat() {
        let mut config = ServerConfig::default();
        config.ports.push(PortConfig::tcp("a", "127.0.0.1", 0));
        config.ports.push(PortConfig::http("b", "127.0.0.1", 0));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn tcp_and_udp_may_share_a_number() {
        let mut config = ServerConfig::default();
        config.ports.push(PortConfig::tcp("a", "127.0.0.1", 9100));
        config.ports.push(PortConfig::udp("b", "127.0.0.1", 9100));
        assert!(validate_config(&config).is_ok());
    }
}
