//! Process-wide table of exclusive datastore locks.
//!
//! # Responsibilities
//! - Grant at most one holder per datastore
//! - Answer holder queries for write-path lock checks
//! - Drop every lock of a session when it is torn down

use std::sync::{PoisonError, RwLock};

use crate::datastore::Datastore;
use crate::net::connection::SessionId;
use crate::observability::metrics;

#[derive(Debug, Default)]
struct Slots {
    running: Option<SessionId>,
    startup: Option<SessionId>,
    candidate: Option<SessionId>,
}

impl Slots {
    fn slot(&self, ds: Datastore) -> &Option<SessionId> {
        match ds {
            Datastore::Running => &self.running,
            Datastore::Startup => &self.startup,
            Datastore::Candidate => &self.candidate,
        }
    }

    fn slot_mut(&mut self, ds: Datastore) -> &mut Option<SessionId> {
        match ds {
            Datastore::Running => &mut self.running,
            Datastore::Startup => &mut self.startup,
            Datastore::Candidate => &mut self.candidate,
        }
    }
}

/// Exclusive lock slots for the running, startup and candidate datastores.
///
/// Writers (acquire/release) take the write side of a single `RwLock`,
/// holder queries take the read side, so a concurrent teardown is never
/// observed half-applied.
#[derive(Debug, Default)]
pub struct LockRegistry {
    slots: RwLock<Slots>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock on `ds` for `session`.
    ///
    /// Re-acquiring a lock the session already holds succeeds without
    /// change. Returns `false`, leaving the slot untouched, when another
    /// session holds it.
    pub fn acquire(&self, ds: Datastore, session: SessionId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot_mut(ds);
        let granted = match *slot {
            None => {
                *slot = Some(session);
                true
            }
            Some(holder) => holder == session,
        };
        drop(slots);

        if granted {
            tracing::debug!(datastore = %ds, session_id = %session, "Datastore lock acquired");
        } else {
            tracing::debug!(datastore = %ds, session_id = %session, "Datastore lock denied");
        }
        metrics::record_lock_attempt(ds, granted);
        granted
    }

    /// Release the lock on `ds` if `session` holds it.
    ///
    /// Returns whether a lock was actually released.
    pub fn release(&self, ds: Datastore, session: SessionId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot_mut(ds);
        if *slot == Some(session) {
            *slot = None;
            tracing::debug!(datastore = %ds, session_id = %session, "Datastore lock released");
            true
        } else {
            false
        }
    }

    /// Clear every slot held by `session`. Returns the datastores released.
    pub fn release_all_for(&self, session: SessionId) -> Vec<Datastore> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut released = Vec::new();
        for ds in Datastore::ALL {
            let slot = slots.slot_mut(ds);
            if *slot == Some(session) {
                *slot = None;
                released.push(ds);
            }
        }
        drop(slots);

        if !released.is_empty() {
            tracing::info!(session_id = %session, datastores = ?released, "Released locks of terminated session");
        }
        released
    }

    /// Current holder of the lock on `ds`.
    pub fn holder(&self, ds: Datastore) -> Option<SessionId> {
        *self.slots.read().unwrap_or_else(PoisonError::into_inner).slot(ds)
    }

    /// Whether `session` may write to `ds`: the slot is free or held by it.
    pub fn permits_write(&self, ds: Datastore, session: SessionId) -> Result<(), SessionId> {
        match self.holder(ds) {
            Some(holder) if holder != session => Err(holder),
            _ => Ok(()),
        }
    }

    /// Datastores currently locked by `session`.
    pub fn held_by(&self, session: SessionId) -> Vec<Datastore> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Datastore::ALL
            .into_iter()
            .filter(|ds| *slots.slot(*ds) == Some(session))
            .collect()
    }
}
