//! HTTP and WebSocket protocol handling.
//!
//! # Data Flow
//! ```text
//! TCP connection on an HTTP/WebSocket port
//!     → server.rs (hyper http1, body limit, upgrade detection)
//!     → request.rs (request ID, application-facing view)
//!     → websocket.rs (handshake: policy, key validation, 101)
//!     → frame.rs (data vs close classification)
//!     → response.rs (status/headers/body, ended exactly once)
//! ```

pub mod frame;
pub mod request;
pub mod response;
pub(crate) mod server;
pub mod websocket;

pub use frame::{CloseFrame, DataFrame, Frame, OpCode, RawFrame};
pub use request::{Request, RequestId, X_REQUEST_ID};
pub use response::Response;
pub use websocket::{HandshakeEngine, HandshakeError};
