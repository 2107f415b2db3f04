//! Protocol-level errors returned to the peer.

use crate::net::connection::SessionId;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Target datastore is locked by another session.
    #[error("lock held by session {holder}")]
    LockDenied { holder: SessionId },

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("data missing: {0}")]
    DataMissing(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Error tag reported on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            RpcError::LockDenied { .. } => "lock-denied",
            RpcError::MissingParameter(_) => "missing-attribute",
            RpcError::InvalidValue(_) => "invalid-value",
            RpcError::DataMissing(_) => "data-missing",
            RpcError::NotSupported(_) => "operation-not-supported",
            RpcError::AccessDenied(_) => "access-denied",
            RpcError::OperationFailed(_) => "operation-failed",
            RpcError::Malformed(_) => "malformed-message",
        }
    }

    /// Session holding the conflicting lock, for `lock-denied`.
    pub fn holder(&self) -> Option<SessionId> {
        match self {
            RpcError::LockDenied { holder } => Some(*holder),
            _ => None,
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AccessDenied(user) => RpcError::AccessDenied(user),
            StoreError::Invalid(msg) => RpcError::InvalidValue(msg),
            StoreError::NotFound(what) => RpcError::DataMissing(what),
            other => RpcError::OperationFailed(other.to_string()),
        }
    }
}
