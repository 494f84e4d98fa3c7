//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc with ports and plugins
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; ports never change after creation
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdminConfig;
pub use schema::LifecycleConfig;
pub use schema::ListenerSettings;
pub use schema::ObservabilityConfig;
pub use schema::PortConfig;
pub use schema::ServerConfig;
pub use schema::SocketType;
