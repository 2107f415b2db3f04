//! Session lifecycle: store binding and the poll worker.
//!
//! # Data Flow
//! ```text
//! accept loop: accepted session
//!     → binding::bind (store session as the user)
//!     → worker::Registrar::register
//! poll worker:
//!     → requests dispatched through operations
//!     → ended session: close → StoreBinding::teardown → locks released
//! ```
//!
//! # Design Decisions
//! - Bind happens before registration; the binding travels with the session
//! - The worker is the only place sessions leave the live set

pub mod binding;
pub mod worker;

pub use binding::{bind, BindError, StoreBinding};
pub use worker::{Registrar, Registration, WorkerContext, WorkerError};
