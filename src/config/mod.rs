//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable for one run)
//!     → shared via Arc with the accept loop and poll worker
//!
//! On restart signal:
//!     lifecycle re-reads the file before re-initialising
//!     → a broken file keeps the previous ServerConfig
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart cycle
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    LifecycleConfig, ListenerConfig, ObservabilityConfig, PollingConfig, ServerConfig, StoreConfig,
    WithDefaultsConfig,
};
pub use validation::{validate_config, ValidationError};
