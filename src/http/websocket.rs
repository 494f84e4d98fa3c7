//! WebSocket opening handshake (RFC 6455 §4.2).
//!
//! # Responsibilities
//! - Run the application's pre-handshake policy (custom handshake ports)
//! - Validate `Sec-WebSocket-Key` and derive `Sec-WebSocket-Accept`
//! - Write the `101 Switching Protocols` response
//! - Defer the open notification until the response has been flushed
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → policy hook (custom handshake only)      false → PolicyRejected, nothing written
//!     → key pattern + 16-byte decode check       bad   → 400, no headers, response ended
//!     → accept key = base64(sha1(key ++ GUID))
//!     → 101 + Upgrade/Connection/Accept/Version[/Protocol]
//!     → defer(on_ws_open(request))
//! ```

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::handler::WsHandler;
use crate::net::listener::Defer;
use crate::observability::metrics;

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Why an upgrade attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("custom handshake policy rejected the upgrade")]
    PolicyRejected,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("malformed Sec-WebSocket-Key `{0}`")]
    MalformedKey(String),

    #[error("Sec-WebSocket-Key decodes to {decoded} bytes, expected 16")]
    KeyLength { decoded: usize },

    #[error("port does not speak WebSocket")]
    NotWebSocket,
}

impl HandshakeError {
    /// Caller-driven rejection rather than a protocol violation.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, HandshakeError::PolicyRejected)
    }

    pub(crate) fn outcome(&self) -> &'static str {
        match self {
            HandshakeError::PolicyRejected => "rejected",
            _ => "invalid",
        }
    }
}

/// True when the request asks to switch to the WebSocket protocol.
pub fn is_upgrade_request(request: &Request) -> bool {
    let upgrade = request
        .header(header::UPGRADE.as_str())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection = request
        .header(header::CONNECTION.as_str())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    upgrade && connection
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Check the key shape (`[+/0-9A-Za-z]{21}[AQgw]==`) and its decoded length.
pub fn validate_client_key(key: &str) -> Result<(), HandshakeError> {
    let bytes = key.as_bytes();
    let shaped = bytes.len() == 24
        && bytes[..21].iter().copied().all(is_base64_char)
        && matches!(bytes[21], b'A' | b'Q' | b'g' | b'w')
        && &bytes[22..] == b"==";

    if !shaped {
        return Err(HandshakeError::MalformedKey(key.to_string()));
    }

    // 21 free characters plus one of `AQgw` always decode to exactly 16 bytes,
    // so a wrong length only shows up as a shape failure above.
    let decoded = BASE64
        .decode(key)
        .map_err(|_| HandshakeError::MalformedKey(key.to_string()))?;
    if decoded.len() != 16 {
        return Err(HandshakeError::KeyLength {
            decoded: decoded.len(),
        });
    }
    Ok(())
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn derive_accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}

/// Validate the client key and write the `101` response.
///
/// On a bad key the response is ended as `400` with no headers written.
pub fn accept_upgrade(request: &Request, response: &mut Response) -> Result<(), HandshakeError> {
    let checked = match request.header("sec-websocket-key") {
        Some(key) => validate_client_key(key).map(|()| key),
        None => Err(HandshakeError::MissingKey),
    };

    let key = match checked {
        Ok(key) => key,
        Err(e) => {
            response.status(StatusCode::BAD_REQUEST);
            response.end();
            return Err(e);
        }
    };

    // base64 output is always a valid header value.
    let accept = HeaderValue::from_str(&derive_accept_key(key))
        .map_err(|_| HandshakeError::MalformedKey(key.to_string()))?;

    response
        .header(header::UPGRADE, HeaderValue::from_static("websocket"))
        .header(header::CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .header(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));

    if let Some(protocol) = request.headers().get(header::SEC_WEBSOCKET_PROTOCOL) {
        response.header(header::SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }

    response.status(StatusCode::SWITCHING_PROTOCOLS);
    response.end();
    Ok(())
}

/// Handshake for ports with `custom_handshake` enabled.
pub struct HandshakeEngine {
    port: String,
    handler: Arc<dyn WsHandler>,
}

impl HandshakeEngine {
    pub fn new(port: impl Into<String>, handler: Arc<dyn WsHandler>) -> Self {
        Self {
            port: port.into(),
            handler,
        }
    }

    /// Run policy, validation and response; defer `on_ws_open` on success.
    pub async fn handshake(
        &self,
        request: Request,
        response: &mut Response,
        defer: &dyn Defer,
    ) -> Result<(), HandshakeError> {
        if !self.handler.on_ws_pass_custom_handshake(&request).await {
            tracing::debug!(port = %self.port, conn = %request.conn(), "Handshake rejected by policy");
            metrics::record_handshake(&self.port, HandshakeError::PolicyRejected.outcome());
            return Err(HandshakeError::PolicyRejected);
        }

        if let Err(e) = accept_upgrade(&request, response) {
            tracing::warn!(port = %self.port, conn = %request.conn(), error = %e, "Handshake failed");
            metrics::record_handshake(&self.port, e.outcome());
            return Err(e);
        }

        metrics::record_handshake(&self.port, "accepted");
        let handler = Arc::clone(&self.handler);
        defer.defer(Box::pin(async move {
            handler.on_ws_open(request).await;
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::frame::Frame;
    use crate::net::connection::ConnectionId;
    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::http;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn upgrade_request(key: Option<&str>, protocol: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .uri("/ws")
            .header("Upgrade", "websocket")
            .header("Connection", "keep-alive, Upgrade")
            .header("Sec-WebSocket-Version", "13");
        if let Some(key) = key {
            builder = builder.header("Sec-WebSocket-Key", key);
        }
        if let Some(protocol) = protocol {
            builder = builder.header("Sec-WebSocket-Protocol", protocol);
        }
        Request::from_http(ConnectionId::new(), builder.body(Bytes::new()).unwrap())
    }

    #[derive(Default)]
    struct Collected(Mutex<Vec<BoxFuture<'static, ()>>>);

    impl Defer for Collected {
        fn defer(&self, task: BoxFuture<'static, ()>) {
            self.0.lock().unwrap().push(task);
        }
    }

    impl Collected {
        async fn run(&self) {
            let tasks: Vec<_> = self.0.lock().unwrap().drain(..).collect();
            for task in tasks {
                task.await;
            }
        }
    }

    struct Policy {
        allow: bool,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl WsHandler for Policy {
        async fn on_ws_message(&self, _frame: Frame) {}

        async fn on_ws_open(&self, _request: Request) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_ws_pass_custom_handshake(&self, _request: &Request) -> bool {
            self.allow
        }
    }

    fn policy(allow: bool) -> Arc<Policy> {
        Arc::new(Policy {
            allow,
            opened: AtomicUsize::new(0),
        })
    }

    #[test]
    fn rfc_6455_sample_key() {
        assert!(validate_client_key(RFC_KEY).is_ok());
        assert_eq!(derive_accept_key(RFC_KEY), RFC_ACCEPT);
    }

    #[test]
    fn matches_tungstenite_derivation() {
        let key = "x3JJHMbDL1EzLkh9GBhXDw==";
        assert_eq!(
            derive_accept_key(key),
            tokio_tungstenite::tungstenite::handshake::derive_accept_key(key.as_bytes())
        );
    }

    #[test]
    fn rejects_keys_of_wrong_decoded_length() {
        // 15 and 17 random bytes, base64 encoded.
        let fifteen = BASE64.encode([7u8; 15]);
        let seventeen = BASE64.encode([7u8; 17]);

        for key in [fifteen, seventeen] {
            let request = upgrade_request(Some(&key), None);
            let mut response = Response::new();
            assert_eq!(
                accept_upgrade(&request, &mut response),
                Err(HandshakeError::MalformedKey(key.clone()))
            );
            assert!(response.is_ended());
            assert!(response.headers().is_empty());
            assert_ne!(response.status_code(), StatusCode::SWITCHING_PROTOCOLS);
        }
    }

    #[test]
    fn rejects_malformed_and_missing_keys() {
        for key in ["", "not base64 at all!!!!!==", "dGhlIHNhbXBsZSBub25jZR=="] {
            assert!(matches!(
                validate_client_key(key),
                Err(HandshakeError::MalformedKey(_))
            ));
        }

        let mut response = Response::new();
        assert_eq!(
            accept_upgrade(&upgrade_request(None, None), &mut response),
            Err(HandshakeError::MissingKey)
        );
        assert!(response.headers().is_empty());
    }

    #[test]
    fn writes_exact_response_headers() {
        let request = upgrade_request(Some(RFC_KEY), Some("chat, superchat"));
        let mut response = Response::new();
        accept_upgrade(&request, &mut response).unwrap();

        assert!(response.is_ended());
        assert_eq!(response.status_code(), StatusCode::SWITCHING_PROTOCOLS);
        let headers = response.headers();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers["upgrade"], "websocket");
        assert_eq!(headers["connection"], "Upgrade");
        assert_eq!(headers["sec-websocket-accept"], RFC_ACCEPT);
        assert_eq!(headers["sec-websocket-version"], "13");
        assert_eq!(headers["sec-websocket-protocol"], "chat, superchat");
    }

    #[test]
    fn protocol_header_only_when_requested() {
        let mut response = Response::new();
        accept_upgrade(&upgrade_request(Some(RFC_KEY), None), &mut response).unwrap();
        assert!(response.headers().get("sec-websocket-protocol").is_none());
        assert_eq!(response.headers().len(), 4);
    }

    #[test]
    fn detects_upgrade_requests() {
        assert!(is_upgrade_request(&upgrade_request(Some(RFC_KEY), None)));

        let plain = Request::from_http(
            ConnectionId::new(),
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
        );
        assert!(!is_upgrade_request(&plain));
    }

    #[tokio::test]
    async fn policy_rejection_writes_nothing_and_never_opens() {
        let handler = policy(false);
        let engine = HandshakeEngine::new("ws", handler.clone());
        let defer = Collected::default();
        let mut response = Response::new();

        let err = engine
            .handshake(upgrade_request(Some(RFC_KEY), None), &mut response, &defer)
            .await
            .unwrap_err();

        assert!(err.is_policy_rejection());
        assert!(!response.is_ended());
        assert!(response.headers().is_empty());
        defer.run().await;
        assert_eq!(handler.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_is_deferred_until_scheduled() {
        let handler = policy(true);
        let engine = HandshakeEngine::new("ws", handler.clone());
        let defer = Collected::default();
        let mut response = Response::new();

        engine
            .handshake(upgrade_request(Some(RFC_KEY), None), &mut response, &defer)
            .await
            .unwrap();

        assert_eq!(response.status_code(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(handler.opened.load(Ordering::SeqCst), 0);
        defer.run().await;
        assert_eq!(handler.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_key_never_opens() {
        let handler = policy(true);
        let engine = HandshakeEngine::new("ws", handler.clone());
        let defer = Collected::default();
        let mut response = Response::new();

        let err = engine
            .handshake(upgrade_request(Some("short=="), None), &mut response, &defer)
            .await
            .unwrap_err();

        assert!(!err.is_policy_rejection());
        assert!(response.is_ended());
        defer.run().await;
        assert_eq!(handler.opened.load(Ordering::SeqCst), 0);
    }
}
