//! Configuration-store backend contract.
//!
//! # Data Flow
//! ```text
//! startup (lifecycle::startup)
//!     → StoreBackend::open_session(server identity, startup) → list_schemas
//! accepted session (session::binding)
//!     → StoreBackend::open_session(user, running) → StoreHandle owned by StoreBinding
//! RPC handlers (operations)
//!     → StoreHandle reads / writes
//! teardown
//!     → StoreHandle::close (idempotent)
//! ```
//!
//! # Design Decisions
//! - Backends are trait objects so the lifecycle can swap them per cycle
//! - Handles are exclusive to one binding; sharing goes through the binding

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::datastore::Datastore;

pub use memory::MemoryStore;

/// Errors reported by a configuration-store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend refused to open a session for this user.
    #[error("access denied for user {0}")]
    AccessDenied(String),

    /// The backend is not connected (disconnected or never connected).
    #[error("store backend is not connected")]
    Disconnected,

    /// The handle was already closed.
    #[error("store session is closed")]
    SessionClosed,

    /// Operation is not allowed on this datastore.
    #[error("operation not permitted on {0} datastore")]
    NotPermitted(Datastore),

    /// Content failed validation.
    #[error("validation failed: {0}")]
    Invalid(String),

    /// Unknown RPC or item.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend-internal failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Identity a store session is opened under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

/// Options applied to a backing store session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionOptions {
    /// Only configuration data is visible to reads.
    #[serde(default)]
    pub config_only: bool,
}

/// A schema module known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(default)]
    pub revision: Option<String>,
    /// Top-level RPCs defined by the module.
    #[serde(default)]
    pub rpcs: Vec<String>,
}

/// Flat datastore content: item path → value.
pub type Tree = BTreeMap<String, Value>;

/// Connection to a configuration-store backend.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Open a transactional session on `datastore` under `identity`.
    async fn open_session(
        &self,
        identity: &Identity,
        datastore: Datastore,
        options: SessionOptions,
    ) -> Result<Box<dyn StoreHandle>, StoreError>;

    /// Schema modules installed in the store.
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>, StoreError>;

    /// Drop the backend connection. Open handles become unusable.
    async fn disconnect(&self);
}

/// A per-session handle into the store, scoped to one user.
#[async_trait]
pub trait StoreHandle: Send {
    /// Datastore reads and writes currently target.
    fn datastore(&self) -> Datastore;

    fn switch_datastore(&mut self, datastore: Datastore);

    /// Items under `prefix` (all items for an empty prefix).
    async fn get_items(&mut self, prefix: &str) -> Result<Tree, StoreError>;

    async fn set_item(&mut self, path: &str, value: Value) -> Result<(), StoreError>;

    async fn delete_item(&mut self, path: &str) -> Result<(), StoreError>;

    /// Replace `target` with the content of `source`.
    async fn copy_config(&mut self, source: Datastore, target: Datastore) -> Result<(), StoreError>;

    /// Empty `target`.
    async fn delete_config(&mut self, target: Datastore) -> Result<(), StoreError>;

    /// Apply candidate to running.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Reset candidate to running.
    async fn discard_changes(&mut self) -> Result<(), StoreError>;

    async fn validate(&mut self, datastore: Datastore) -> Result<(), StoreError>;

    /// Invoke a module RPC implemented by the store.
    async fn rpc_send(&mut self, name: &str, input: Value) -> Result<Value, StoreError>;

    /// Close the session. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), StoreError>;

    fn is_closed(&self) -> bool;
}
