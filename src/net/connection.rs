//! Session identity and lifecycle accounting.
//!
//! # Responsibilities
//! - Generate unique session IDs for the wire and for lock ownership
//! - Count binds, teardowns and bind failures across restarts
//! - Feed the live-session gauge

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::observability::metrics;

/// Global atomic counter for session IDs.
/// Relaxed ordering is enough, only uniqueness matters.
static SESSION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Identifier of a protocol session, as advertised in the server hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    /// Allocate a new unique session ID.
    pub fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw ID received from a peer or a transport.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a protocol session as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Hello exchanged, processing RPCs.
    Running,
    /// Peer closed the session or close-session was processed.
    Terminated,
    /// Transport reported an I/O or framing failure.
    Invalid,
}

/// Counters describing the session population.
///
/// Shared by the Accept Loop (binds, bind failures) and the Poll Worker
/// (teardowns). Every successful bind is matched by exactly one teardown
/// once the worker has drained.
#[derive(Debug, Default)]
pub struct SessionStats {
    bound: AtomicU64,
    torn_down: AtomicU64,
    bind_failures: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bind(&self) {
        self.bound.fetch_add(1, Ordering::SeqCst);
        metrics::record_session_bound();
        metrics::set_live_sessions(self.live());
    }

    pub fn record_bind_failure(&self) {
        self.bind_failures.fetch_add(1, Ordering::SeqCst);
        metrics::record_bind_failure();
    }

    pub fn record_teardown(&self) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        metrics::record_session_teardown();
        metrics::set_live_sessions(self.live());
    }

    /// Successful binds so far.
    pub fn bound(&self) -> u64 {
        self.bound.load(Ordering::SeqCst)
    }

    /// Completed teardowns so far.
    pub fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn bind_failures(&self) -> u64 {
        self.bind_failures.load(Ordering::SeqCst)
    }

    /// Bindings not yet torn down.
    pub fn live(&self) -> u64 {
        self.bound().saturating_sub(self.torn_down())
    }
}
