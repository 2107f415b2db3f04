//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection
//!     → tcp.rs (hello exchange, session id allocation)
//!     → attach hello? routed to the parent session as a secondary channel
//!     → listener.rs (accept loop: bind, register with the poll worker)
//!     → message.rs frames requests and replies, one JSON document per line
//!
//! Session States:
//!     Running → Terminated | Invalid
//! ```
//!
//! # Design Decisions
//! - Every wait is bounded so the loops observe the control flag promptly
//! - transport.rs is the contract; tcp.rs is one implementation of it

pub mod connection;
pub mod listener;
pub mod message;
pub mod tcp;
pub mod transport;

pub use connection::{SessionId, SessionStats, SessionStatus};
pub use listener::AcceptLoop;
pub use tcp::TcpTransport;
pub use transport::{ProtocolSession, SessionEvent, Transport, TransportError};
