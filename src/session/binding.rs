//! Pairing of a protocol session with its backing store session.
//!
//! # Responsibilities
//! - Open a store session on `running` as the session's user
//! - Give the poll worker exclusive access to the store handle
//! - Tear everything down exactly once: close the handle, then drop every
//!   lock the owning session holds

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

use crate::datastore::{Datastore, LockRegistry};
use crate::net::connection::{SessionId, SessionStats};
use crate::store::{Identity, SessionOptions, StoreBackend, StoreError, StoreHandle};

/// Error returned when a session cannot be bound.
#[derive(Debug, thiserror::Error)]
#[error("cannot bind session {session_id} ({username}) to the store: {source}")]
pub struct BindError {
    pub session_id: SessionId,
    pub username: String,
    #[source]
    pub source: StoreError,
}

/// Store session owned by one protocol session (and its secondary channels).
pub struct StoreBinding {
    owner: SessionId,
    username: String,
    datastore: Datastore,
    options: SessionOptions,
    handle: Mutex<Option<Box<dyn StoreHandle>>>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBinding")
            .field("owner", &self.owner)
            .field("username", &self.username)
            .field("datastore", &self.datastore)
            .field("options", &self.options)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Open a store session for `session_id` as `username`.
///
/// On failure nothing is registered anywhere; the caller closes the
/// protocol session itself.
pub async fn bind(
    store: &dyn StoreBackend,
    session_id: SessionId,
    username: &str,
    options: SessionOptions,
    stats: &SessionStats,
) -> Result<StoreBinding, BindError> {
    let identity = Identity::new(username);
    match store.open_session(&identity, Datastore::Running, options).await {
        Ok(handle) => {
            stats.record_bind();
            tracing::debug!(session_id = %session_id, username = %username, "Session bound to store");
            Ok(StoreBinding {
                owner: session_id,
                username: username.to_string(),
                datastore: Datastore::Running,
                options,
                handle: Mutex::new(Some(handle)),
                torn_down: AtomicBool::new(false),
            })
        }
        Err(source) => {
            stats.record_bind_failure();
            Err(BindError {
                session_id,
                username: username.to_string(),
                source,
            })
        }
    }
}

impl StoreBinding {
    /// Session whose identity owns locks taken through this binding.
    pub fn owner(&self) -> SessionId {
        self.owner
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn datastore(&self) -> Datastore {
        self.datastore
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Exclusive access to the store handle; `None` after teardown.
    pub async fn handle(&self) -> MutexGuard<'_, Option<Box<dyn StoreHandle>>> {
        self.handle.lock().await
    }

    /// Close the store session and release the owner's locks.
    ///
    /// Only the first call does anything; it returns `true`.
    pub async fn teardown(&self, locks: &LockRegistry, stats: &SessionStats) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(mut handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.close().await {
                tracing::warn!(session_id = %self.owner, error = %e, "Closing store session failed");
            }
        }

        let released = locks.release_all_for(self.owner);
        stats.record_teardown();
        tracing::debug!(
            session_id = %self.owner,
            username = %self.username,
            released_locks = released.len(),
            "Session binding torn down"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        let store = MemoryStore::new(Vec::new(), vec!["mallory".into()]);
        store.connect();
        store
    }

    #[tokio::test]
    async fn bind_failure_leaves_no_trace() {
        let store = store();
        let stats = SessionStats::new();
        let id = SessionId::from_raw(501);

        let err = bind(&store, id, "mallory", SessionOptions::default(), &stats)
            .await
            .unwrap_err();
        assert_eq!(err.session_id, id);
        assert_eq!(err.source, StoreError::AccessDenied("mallory".into()));
        assert_eq!(stats.bound(), 0);
        assert_eq!(stats.bind_failures(), 1);
    }

    #[tokio::test]
    async fn teardown_releases_locks_once() {
        let store = store();
        let stats = SessionStats::new();
        let locks = LockRegistry::new();
        let id = SessionId::from_raw(502);

        let binding = bind(&store, id, "alice", SessionOptions::default(), &stats).await.unwrap();
        assert_eq!(binding.owner(), id);
        assert_eq!(binding.datastore(), Datastore::Running);
        assert!(locks.acquire(Datastore::Running, id));
        assert!(locks.acquire(Datastore::Candidate, id));

        assert!(binding.teardown(&locks, &stats).await);
        assert!(!binding.teardown(&locks, &stats).await);

        assert!(binding.is_torn_down());
        assert!(binding.handle().await.is_none());
        assert_eq!(locks.holder(Datastore::Running), None);
        assert_eq!(locks.holder(Datastore::Candidate), None);
        assert_eq!(stats.torn_down(), 1);
        assert_eq!(stats.live(), 0);
    }

    #[tokio::test]
    async fn teardown_leaves_other_sessions_locks() {
        let store = store();
        let stats = SessionStats::new();
        let locks = LockRegistry::new();
        let (a, b) = (SessionId::from_raw(503), SessionId::from_raw(504));

        let binding = bind(&store, a, "alice", SessionOptions::default(), &stats).await.unwrap();
        locks.acquire(Datastore::Running, a);
        locks.acquire(Datastore::Startup, b);

        binding.teardown(&locks, &stats).await;
        assert_eq!(locks.holder(Datastore::Running), None);
        assert_eq!(locks.holder(Datastore::Startup), Some(b));
    }
}
