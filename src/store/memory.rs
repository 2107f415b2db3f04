//! In-process configuration store.
//!
//! Three datastores as ordered item maps. Content survives restart cycles
//! because the lifecycle reconnects to the same `MemoryStore` instance.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::datastore::Datastore;
use crate::store::{
    Identity, SchemaInfo, SessionOptions, StoreBackend, StoreError, StoreHandle, Tree,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    running: Tree,
    startup: Tree,
}

#[derive(Debug)]
struct Shared {
    datastores: RwLock<HashMap<Datastore, Tree>>,
    schemas: Vec<SchemaInfo>,
    deny_users: HashSet<String>,
    connected: AtomicBool,
}

/// Memory-backed store. Cheap to clone; clones share content.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty, disconnected store.
    pub fn new(schemas: Vec<SchemaInfo>, deny_users: Vec<String>) -> Self {
        Self::with_content(Tree::new(), Tree::new(), schemas, deny_users)
    }

    fn with_content(running: Tree, startup: Tree, schemas: Vec<SchemaInfo>, deny_users: Vec<String>) -> Self {
        let mut datastores = HashMap::new();
        datastores.insert(Datastore::Candidate, running.clone());
        datastores.insert(Datastore::Running, running);
        datastores.insert(Datastore::Startup, startup);
        Self {
            shared: Arc::new(Shared {
                datastores: RwLock::new(datastores),
                schemas,
                deny_users: deny_users.into_iter().collect(),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Create a store seeded from a JSON file with `running` and `startup` trees.
    pub fn from_seed_file(path: &Path, schemas: Vec<SchemaInfo>, deny_users: Vec<String>) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))?;
        let seed: SeedFile = serde_json::from_str(&content)
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            path = %path.display(),
            running_items = seed.running.len(),
            startup_items = seed.startup.len(),
            "Seeded memory store"
        );
        Ok(Self::with_content(seed.running, seed.startup, schemas, deny_users))
    }

    /// Mark the store connected. Sessions can only be opened while connected.
    pub fn connect(&self) {
        self.shared.connected.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Snapshot of one datastore.
    pub fn snapshot(&self, ds: Datastore) -> Tree {
        self.shared.read(ds)
    }
}

impl Shared {
    fn read(&self, ds: Datastore) -> Tree {
        self.datastores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ds)
            .cloned()
            .unwrap_or_default()
    }

    fn write<R>(&self, ds: Datastore, f: impl FnOnce(&mut Tree) -> R) -> R {
        let mut guard = self.datastores.write().unwrap_or_else(PoisonError::into_inner);
        f(guard.entry(ds).or_default())
    }

    fn replace(&self, target: Datastore, content: Tree) {
        self.write(target, |tree| *tree = content);
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn open_session(
        &self,
        identity: &Identity,
        datastore: Datastore,
        options: SessionOptions,
    ) -> Result<Box<dyn StoreHandle>, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Disconnected);
        }
        if self.shared.deny_users.contains(&identity.username) {
            return Err(StoreError::AccessDenied(identity.username.clone()));
        }
        Ok(Box::new(MemoryHandle {
            shared: Arc::clone(&self.shared),
            username: identity.username.clone(),
            datastore,
            options,
            closed: false,
        }))
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Disconnected);
        }
        Ok(self.shared.schemas.clone())
    }

    async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);
        tracing::debug!("Memory store disconnected");
    }
}

#[derive(Debug)]
struct MemoryHandle {
    shared: Arc<Shared>,
    username: String,
    datastore: Datastore,
    options: SessionOptions,
    closed: bool,
}

impl MemoryHandle {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::SessionClosed);
        }
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(StoreError::Disconnected);
        }
        Ok(())
    }
}

fn check_path(path: &str) -> Result<(), StoreError> {
    if path.starts_with('/') && path.len() > 1 {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!("item path must be absolute: {:?}", path)))
    }
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    fn datastore(&self) -> Datastore {
        self.datastore
    }

    fn switch_datastore(&mut self, datastore: Datastore) {
        self.datastore = datastore;
    }

    async fn get_items(&mut self, prefix: &str) -> Result<Tree, StoreError> {
        self.ensure_open()?;
        let tree = self.shared.read(self.datastore);
        Ok(tree.into_iter().filter(|(path, _)| path.starts_with(prefix)).collect())
    }

    async fn set_item(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_path(path)?;
        self.shared.write(self.datastore, |tree| {
            tree.insert(path.to_string(), value);
        });
        Ok(())
    }

    async fn delete_item(&mut self, path: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.shared
            .write(self.datastore, |tree| tree.remove(path))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn copy_config(&mut self, source: Datastore, target: Datastore) -> Result<(), StoreError> {
        self.ensure_open()?;
        if source != target {
            let content = self.shared.read(source);
            self.shared.replace(target, content);
        }
        Ok(())
    }

    async fn delete_config(&mut self, target: Datastore) -> Result<(), StoreError> {
        self.ensure_open()?;
        if target == Datastore::Running {
            return Err(StoreError::NotPermitted(target));
        }
        self.shared.replace(target, Tree::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let candidate = self.shared.read(Datastore::Candidate);
        self.shared.replace(Datastore::Running, candidate);
        Ok(())
    }

    async fn discard_changes(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let running = self.shared.read(Datastore::Running);
        self.shared.replace(Datastore::Candidate, running);
        Ok(())
    }

    async fn validate(&mut self, datastore: Datastore) -> Result<(), StoreError> {
        self.ensure_open()?;
        let tree = self.shared.read(datastore);
        tree.keys().try_for_each(|path| check_path(path))
    }

    async fn rpc_send(&mut self, name: &str, input: Value) -> Result<Value, StoreError> {
        self.ensure_open()?;
        let known = self.shared.schemas.iter().any(|m| m.rpcs.iter().any(|r| r == name));
        if !known {
            return Err(StoreError::NotFound(format!("rpc {}", name)));
        }
        Ok(json!({
            "rpc": name,
            "user": self.username,
            "config-only": self.options.config_only,
            "input": input,
        }))
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            tracing::trace!(username = %self.username, "Store session closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
