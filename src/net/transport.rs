//! Transport contract consumed by the Accept Loop and the Poll Worker.

use async_trait::async_trait;
use std::time::Duration;

use crate::net::connection::{SessionId, SessionStatus};
use crate::net::message::{Reply, Request};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening endpoint.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// The accept primitive itself failed.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// I/O failure on an established session.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hello exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A line exceeded the configured message size.
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// Outgoing message could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// No secondary channel is waiting on this session.
    #[error("no pending channel on session {0}")]
    NoPendingChannel(SessionId),

    /// The session was already closed.
    #[error("session {0} is closed")]
    Closed(SessionId),
}

/// Something that happened on a session while it was being waited on.
#[derive(Debug)]
pub enum SessionEvent {
    /// A complete request arrived.
    Rpc(Request),
    /// A line arrived that is not a valid request.
    Malformed { reason: String },
    /// A secondary channel was opened on this session; accept it with
    /// [`ProtocolSession::accept_secondary_channel`].
    ChannelRequested,
    /// The peer ended the session.
    Terminated,
    /// The session failed and cannot be used further.
    Failed(TransportError),
}

/// Source of new protocol sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait up to `timeout` for a new session.
    ///
    /// `Ok(None)` covers the timeout and connections that did not become
    /// sessions (failed hello, secondary channels routed to their parent).
    /// `Err` means the accept primitive itself is broken.
    async fn accept(&self, timeout: Duration) -> Result<Option<Box<dyn ProtocolSession>>, TransportError>;

    /// Stop accepting and release transport-wide resources.
    async fn shutdown(&self);
}

/// One established protocol session.
#[async_trait]
pub trait ProtocolSession: Send {
    fn id(&self) -> SessionId;

    /// Authenticated user name.
    fn username(&self) -> &str;

    fn status(&self) -> SessionStatus;

    /// Wait for the next event.
    ///
    /// Must be cancel-safe: the Poll Worker drops this future whenever
    /// another session or a timeout wins the wait.
    async fn next_event(&mut self) -> SessionEvent;

    async fn reply(&mut self, reply: Reply) -> Result<(), TransportError>;

    /// Accept the secondary channel announced by
    /// [`SessionEvent::ChannelRequested`].
    async fn accept_secondary_channel(&mut self) -> Result<Box<dyn ProtocolSession>, TransportError>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&mut self);
}
