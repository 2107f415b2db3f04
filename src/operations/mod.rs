//! Remote operation dispatch.
//!
//! # Data Flow
//! ```text
//! startup:
//!     schema.rs (module catalogue) → register one handler per operation name
//! poll worker, per request:
//!     OperationRegistry::dispatch(name) → handler → Reply
//! ```
//!
//! # Design Decisions
//! - Handlers are looked up by name at dispatch time, never attached to
//!   schema objects
//! - Handlers only reach core state through `OperationContext`

pub mod error;
pub mod handlers;
pub mod schema;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::datastore::LockRegistry;
use crate::net::connection::SessionId;
use crate::net::message::{Reply, ReplyOutcome, Request};
use crate::observability::metrics;
use crate::store::StoreHandle;

pub use error::RpcError;
pub use schema::SchemaContext;

/// Everything a handler may touch while processing one request.
pub struct OperationContext<'a> {
    /// Lock identity of the requesting session group.
    pub session: SessionId,
    pub locks: &'a LockRegistry,
    pub store: &'a mut dyn StoreHandle,
}

/// Successful result of a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Data(Value),
    /// Reply ok, then end the requesting session.
    CloseSession,
}

/// Handler for one top-level remote operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError>;
}

/// Reply produced for a request plus what the session should do next.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub reply: Reply,
    pub close_session: bool,
}

/// Operation name → handler.
#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(operation = %name, "Operation handler replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Metric label for `operation`: its name if registered, else `"unknown"`.
    pub fn metric_label<'a>(&self, operation: &'a str) -> &'a str {
        if self.contains(operation) {
            operation
        } else {
            "unknown"
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler registered for `request.operation`.
    pub async fn dispatch(&self, ctx: &mut OperationContext<'_>, request: &Request) -> Dispatched {
        let result = match self.handlers.get(&request.operation) {
            Some(handler) => handler.handle(ctx, &request.params).await,
            None => Err(RpcError::NotSupported(request.operation.clone())),
        };

        metrics::record_rpc(self.metric_label(&request.operation), result.is_ok());
        let message_id = Some(request.message_id.clone());
        match result {
            Ok(outcome) => {
                tracing::debug!(session_id = %ctx.session, operation = %request.operation, "RPC processed");
                let close_session = outcome == Outcome::CloseSession;
                let outcome = match outcome {
                    Outcome::Data(data) => ReplyOutcome::Data(data),
                    Outcome::Ok | Outcome::CloseSession => ReplyOutcome::Ok(()),
                };
                Dispatched {
                    reply: Reply { message_id, outcome },
                    close_session,
                }
            }
            Err(e) => {
                tracing::debug!(session_id = %ctx.session, operation = %request.operation, error = %e, "RPC failed");
                Dispatched {
                    reply: Reply::error(message_id, &e),
                    close_session: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl OperationHandler for Noop {
        async fn handle(&self, _ctx: &mut OperationContext<'_>, _params: &Value) -> Result<Outcome, RpcError> {
            Ok(Outcome::Ok)
        }
    }

    #[test]
    fn unregistered_operations_share_one_metric_label() {
        let mut registry = OperationRegistry::new();
        registry.register("get", Arc::new(Noop));

        assert_eq!(registry.metric_label("get"), "get");
        assert_eq!(registry.metric_label("frobnicate"), "unknown");
        assert_eq!(registry.metric_label(&"x".repeat(10_000)), "unknown");
    }
}
