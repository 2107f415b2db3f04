//! The accept loop.
//!
//! # Responsibilities
//! - Wait for new sessions with a bounded timeout
//! - Bind each to a store session and hand it to the poll worker
//! - Close sessions that cannot be bound, without registering them
//! - Abort the run when the accept primitive itself fails

use std::sync::Arc;
use std::time::Duration;

use crate::net::transport::{Transport, TransportError};
use crate::session::worker::{Registrar, Registration, WorkerContext};
use crate::session::bind;
use crate::store::{SessionOptions, StoreBackend};

/// Accepts sessions on the lifecycle task for one run.
pub struct AcceptLoop<'a> {
    pub transport: &'a dyn Transport,
    pub store: &'a dyn StoreBackend,
    pub session_options: SessionOptions,
    pub accept_timeout: Duration,
}

impl AcceptLoop<'_> {
    /// Run until the control flag leaves `Continue` or the run is aborted.
    ///
    /// Consumes `registrar`; the poll worker sees the channel close when
    /// this returns.
    pub async fn run(&self, registrar: Registrar, ctx: &WorkerContext) -> Result<(), TransportError> {
        tracing::debug!(accept_timeout_ms = self.accept_timeout.as_millis() as u64, "Accept loop started");

        while ctx.gate.keep_running(&ctx.control) {
            let mut session = match self.transport.accept(self.accept_timeout).await {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, aborting run");
                    ctx.gate.abort();
                    return Err(e);
                }
            };

            let id = session.id();
            let username = session.username().to_string();
            let binding = match bind(self.store, id, &username, self.session_options, &ctx.stats).await {
                Ok(binding) => Arc::new(binding),
                Err(e) => {
                    tracing::warn!(error = %e, "Rejecting session");
                    session.close().await;
                    continue;
                }
            };

            tracing::info!(session_id = %id, username = %username, "Session accepted");

            if let Err(rejected) = registrar.register(Registration { session, binding }).await {
                tracing::error!(session_id = %id, "Poll worker is gone, aborting run");
                discard(rejected, ctx).await;
                ctx.gate.abort();
                break;
            }
        }

        tracing::debug!("Accept loop stopped");
        Ok(())
    }
}

async fn discard(registration: Registration, ctx: &WorkerContext) {
    let Registration { mut session, binding } = registration;
    session.close().await;
    binding.teardown(&ctx.locks, &ctx.stats).await;
}
