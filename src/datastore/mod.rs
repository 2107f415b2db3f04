//! Datastore selectors and exclusive lock bookkeeping.
//!
//! # Data Flow
//! ```text
//! lock / unlock RPC (operations)
//!     → lock.rs (acquire / release, write side)
//! write RPC (edit-config, copy-config, commit ...)
//!     → lock.rs (holder query, read side)
//! session teardown (session::binding)
//!     → lock.rs (release_all_for, write side)
//! ```
//!
//! # Design Decisions
//! - One slot per datastore, no lock queues
//! - A conflict is a normal negative result, never retried here

pub mod lock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use lock::LockRegistry;

/// One of the named configuration datastores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    Running,
    Startup,
    Candidate,
}

impl Datastore {
    /// Every datastore, in slot order.
    pub const ALL: [Datastore; 3] = [Datastore::Running, Datastore::Startup, Datastore::Candidate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Startup => "startup",
            Datastore::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a datastore name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown datastore: {0}")]
pub struct UnknownDatastore(pub String);

impl FromStr for Datastore {
    type Err = UnknownDatastore;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Datastore::Running),
            "startup" => Ok(Datastore::Startup),
            "candidate" => Ok(Datastore::Candidate),
            other => Err(UnknownDatastore(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!("running".parse::<Datastore>(), Ok(Datastore::Running));
        assert_eq!("candidate".parse::<Datastore>(), Ok(Datastore::Candidate));
        assert!("operational".parse::<Datastore>().is_err());
    }
}
