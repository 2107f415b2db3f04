//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Run ends with a fatal error (accept failure, worker failure):
//!     → backoff.rs (count the failure, compute restart delay)
//!     → lifecycle sleeps, then re-initialises
//!     → budget exhausted: process exits with failure status
//! ```
//!
//! # Design Decisions
//! - A clean run resets the failure streak
//! - Delays carry up to 10% random jitter

pub mod backoff;

pub use backoff::{restart_delay, RestartBudget};
