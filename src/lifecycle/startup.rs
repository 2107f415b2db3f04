//! Per-cycle initialisation and global teardown.
//!
//! # Responsibilities
//! - Connect to the configuration store
//! - Open the internal session on `startup` and load the module catalogue
//! - Register operation handlers and derive hello capabilities
//! - Open the transport endpoint
//! - Undo all of the above, in reverse order, when the cycle ends
//!
//! # Design Decisions
//! - Fail fast: any init error aborts the cycle after undoing partial work
//! - The transport opens last (sessions only arrive once handlers exist)

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ServerConfig;
use crate::datastore::{Datastore, LockRegistry};
use crate::net::connection::SessionStats;
use crate::net::tcp::TcpTransport;
use crate::net::transport::{Transport, TransportError};
use crate::operations::{OperationRegistry, SchemaContext};
use crate::store::{Identity, MemoryStore, SessionOptions, StoreBackend, StoreError, StoreHandle};

/// Identity of the server's own store session.
pub const SERVER_IDENTITY: &str = "netconf-server";

/// Error type for cycle initialisation.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cannot connect to the configuration store: {0}")]
    StoreConnect(#[source] StoreError),

    #[error("cannot open the internal store session: {0}")]
    InternalSession(#[source] StoreError),

    #[error("cannot list schema modules: {0}")]
    ListSchemas(#[source] StoreError),

    #[error("cannot open the transport endpoint: {0}")]
    Transport(#[from] TransportError),
}

/// Factory for the external collaborators of one cycle.
#[async_trait]
pub trait Backends: Send + Sync {
    /// Connect to the configuration store.
    async fn connect_store(&self, config: &ServerConfig) -> Result<Arc<dyn StoreBackend>, StartupError>;

    /// Open the transport endpoint advertising `capabilities`.
    async fn open_transport(
        &self,
        config: &ServerConfig,
        capabilities: Vec<String>,
    ) -> Result<Arc<dyn Transport>, StartupError>;
}

/// In-process memory store and TCP transport.
///
/// The store is created on first connect and reused by later cycles, so its
/// content survives restarts.
#[derive(Debug, Default)]
pub struct DefaultBackends {
    store: Mutex<Option<MemoryStore>>,
}

impl DefaultBackends {
    pub fn new() -> Self {
        Self::default()
    }

    fn memory_store(&self, config: &ServerConfig) -> Result<MemoryStore, StoreError> {
        let mut slot = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }

        let store_config = &config.store;
        let store = match &store_config.seed_path {
            Some(path) => MemoryStore::from_seed_file(
                path,
                store_config.modules.clone(),
                store_config.deny_users.clone(),
            )?,
            None => MemoryStore::new(store_config.modules.clone(), store_config.deny_users.clone()),
        };
        *slot = Some(store.clone());
        Ok(store)
    }
}

#[async_trait]
impl Backends for DefaultBackends {
    async fn connect_store(&self, config: &ServerConfig) -> Result<Arc<dyn StoreBackend>, StartupError> {
        let store = self.memory_store(config).map_err(StartupError::StoreConnect)?;
        store.connect();
        Ok(Arc::new(store))
    }

    async fn open_transport(
        &self,
        config: &ServerConfig,
        capabilities: Vec<String>,
    ) -> Result<Arc<dyn Transport>, StartupError> {
        let transport = TcpTransport::bind(&config.listener, capabilities).await?;
        Ok(Arc::new(transport))
    }
}

/// Everything one cycle of the server runs on.
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn StoreBackend>,
    pub transport: Arc<dyn Transport>,
    pub schema: SchemaContext,
    pub operations: Arc<OperationRegistry>,
    pub capabilities: Vec<String>,
    pub locks: Arc<LockRegistry>,
    pub stats: Arc<SessionStats>,
    /// Server session on `startup`, held for the whole cycle.
    internal: Mutex<Box<dyn StoreHandle>>,
}

impl ServerContext {
    /// Bring up one cycle. Partial work is undone on failure.
    pub async fn init(
        config: Arc<ServerConfig>,
        backends: &dyn Backends,
        locks: Arc<LockRegistry>,
        stats: Arc<SessionStats>,
    ) -> Result<Self, StartupError> {
        let store = backends.connect_store(&config).await?;

        let mut internal = match store
            .open_session(&Identity::new(SERVER_IDENTITY), Datastore::Startup, SessionOptions::default())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                store.disconnect().await;
                return Err(StartupError::InternalSession(e));
            }
        };

        let modules = match store.list_schemas().await {
            Ok(modules) => modules,
            Err(e) => {
                abandon(&mut internal, store.as_ref()).await;
                return Err(StartupError::ListSchemas(e));
            }
        };

        let schema = SchemaContext::load(modules);
        let mut operations = OperationRegistry::new();
        schema.register_operations(&mut operations);
        let capabilities = schema.capabilities(&config.with_defaults);

        let transport = match backends.open_transport(&config, capabilities.clone()).await {
            Ok(transport) => transport,
            Err(e) => {
                abandon(&mut internal, store.as_ref()).await;
                return Err(e);
            }
        };

        tracing::info!(
            modules = schema.len(),
            operations = operations.len(),
            capabilities = capabilities.len(),
            "Server initialised"
        );

        Ok(Self {
            config,
            store,
            transport,
            schema,
            operations: Arc::new(operations),
            capabilities,
            locks,
            stats,
            internal: Mutex::new(internal),
        })
    }

    /// Global teardown: stop the transport, close the internal session,
    /// disconnect the store.
    pub async fn shutdown(mut self) {
        self.transport.shutdown().await;
        let internal = self.internal.get_mut().unwrap_or_else(PoisonError::into_inner);
        abandon(internal, self.store.as_ref()).await;

        let stale = Datastore::ALL
            .iter()
            .filter_map(|ds| self.locks.holder(*ds).map(|holder| (*ds, holder)))
            .collect::<Vec<_>>();
        for (ds, holder) in stale {
            tracing::warn!(datastore = %ds, session_id = %holder, "Lock outlived its session, clearing");
            self.locks.release(ds, holder);
        }
        tracing::debug!("Server context torn down");
    }
}

async fn abandon(internal: &mut Box<dyn StoreHandle>, store: &dyn StoreBackend) {
    if let Err(e) = internal.close().await {
        tracing::warn!(error = %e, "Closing internal store session failed");
    }
    store.disconnect().await;
}
