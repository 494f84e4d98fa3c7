//! Inbound HTTP request carrier.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for tracing
//! - Remember which connection the request arrived on
//! - Expose headers case-insensitively to handlers and the handshake engine
//!
//! # Design Decisions
//! - The body is fully buffered (capped by `max_body_bytes`) before dispatch
//! - Cheap to clone; the handshake engine keeps a copy for the deferred open

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{self, HeaderMap, Method, Uri, Version};
use uuid::Uuid;

use crate::net::connection::ConnectionId;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique identifier for one HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// An HTTP request as seen by port handlers.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    conn: ConnectionId,
    peer: Option<SocketAddr>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    /// Build from decoded request parts and a buffered body.
    pub fn from_parts(
        conn: ConnectionId,
        peer: Option<SocketAddr>,
        parts: http::request::Parts,
        body: Bytes,
    ) -> Self {
        // Honour an upstream request ID when it is a valid UUID.
        let id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(RequestId)
            .unwrap_or_default();

        Self {
            id,
            conn,
            peer,
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    /// Build from an `http::Request` with an in-memory body.
    pub fn from_http(conn: ConnectionId, request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(conn, None, parts, body)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Connection the request arrived on.
    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
