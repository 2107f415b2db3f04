//! Session lifecycle and datastore-lock core of a network-management server.

pub mod config;
pub mod datastore;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod operations;
pub mod resilience;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use datastore::{Datastore, LockRegistry};
pub use lifecycle::{ControlFlag, Lifecycle};
