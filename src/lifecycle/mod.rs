//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → prepare ports → plugins → bind → plugins → serve
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → close connections → join loops
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and happens before traffic
//! - Shutdown has a grace period per serving loop

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
pub use startup::{PortStatus, RunningServer, Server};
