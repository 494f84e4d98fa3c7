//! Outbound HTTP response carrier.
//!
//! # Responsibilities
//! - Collect status, headers and body written by a handler
//! - Track whether the response has been finalised (`end`)
//! - Convert into a hyper response once the handler returns
//!
//! # Design Decisions
//! - Writes after `end` are ignored and logged, never panic
//! - Status defaults to 200, like an untouched listener response

use axum::body::{Body, Bytes};
use axum::http::{self, HeaderMap, HeaderName, HeaderValue, StatusCode};

/// A response under construction by a handler.
#[derive(Debug, Default)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    ended: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status code.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.ended {
            tracing::debug!(status = %status, "Status ignored on ended response");
        } else {
            self.status = status;
        }
        self
    }

    /// Set a header, replacing any previous value.
    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        if self.ended {
            tracing::debug!(header = %name, "Header ignored on ended response");
        } else {
            self.headers.insert(name, value);
        }
        self
    }

    /// Append body bytes.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> &mut Self {
        if self.ended {
            tracing::debug!("Body write ignored on ended response");
        } else {
            self.body.extend_from_slice(chunk.as_ref());
        }
        self
    }

    /// Finalise the response.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Append a final chunk and finalise.
    pub fn end_with(&mut self, chunk: impl AsRef<[u8]>) {
        self.write(chunk);
        self.end();
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into a response hyper can send.
    pub fn into_http(self) -> http::Response<Body> {
        let mut response = http::Response::new(Body::from(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
