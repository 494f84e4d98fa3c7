//! Plugin subsystem.
//!
//! # Data Flow
//! ```text
//! Server::register_plugin(PluginNode)
//!     → registry.rs (duplicate + cycle checks)
//! Server::start
//!     → registry.resolve (names → indices, order indices)
//!     → run(BeforeServerStart)   before any bind
//!     → run(BeforeProcessStart)  after every port is wired
//! ```
//!
//! Within a phase a plugin starts once its predecessor's gate (gate.rs) opens.

pub mod context;
pub mod gate;
pub mod node;
pub mod registry;

pub use context::{Context, LifecyclePhase};
pub use gate::{ReadinessGate, Ready};
pub use node::{Plugin, PluginNode};
pub use registry::{PluginRegistry, PluginStatus};
