//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Cycle (mod.rs):
//!     startup.rs (store, schemas, handlers, transport)
//!     → poll worker spawned, accept loop runs on this task
//!     → flag leaves Continue (or the run aborts) → worker drains
//!     → global teardown
//!     → Restart: reload config, re-arm flag, next cycle
//!     → Stop: return
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGQUIT/SIGABRT → Stop (second one: immediate exit)
//!     SIGHUP/SIGUSR1 → Restart
//! ```
//!
//! # Design Decisions
//! - Ordered startup: store first, transport last
//! - Ordered shutdown: stop accepting, drain sessions, close the store
//! - A failed run restarts with backoff until the failure budget runs out
//! - A run that bound a session or outlasted the backoff cap resets the budget

pub mod control;
pub mod pidfile;
pub mod signals;
pub mod startup;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{load_config, ServerConfig};
use crate::datastore::LockRegistry;
use crate::net::connection::SessionStats;
use crate::net::listener::AcceptLoop;
use crate::net::transport::TransportError;
use crate::observability::metrics;
use crate::resilience::RestartBudget;
use crate::session::worker::{self, WorkerContext, WorkerError};

pub use control::{Control, ControlFlag, CycleGate, SignalClass, Transition};
pub use startup::{Backends, DefaultBackends, ServerContext, StartupError};

/// Why a run of the accept loop and poll worker ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("accept loop failed: {0}")]
    Accept(#[from] TransportError),

    #[error("poll worker failed: {0}")]
    Worker(#[from] WorkerError),
}

/// Error ending the server.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("initialisation failed: {0}")]
    Startup(#[from] StartupError),

    #[error("giving up after {failures} failed runs in a row, last: {last}")]
    TooManyFailures { failures: u32, last: String },
}

/// Run the accept loop and poll worker until the flag leaves `Continue`
/// or the run aborts, then wait for the worker's drain.
pub async fn run_cycle(ctx: &ServerContext, control: &Arc<ControlFlag>) -> Result<(), RunError> {
    let worker_ctx = WorkerContext {
        operations: Arc::clone(&ctx.operations),
        locks: Arc::clone(&ctx.locks),
        stats: Arc::clone(&ctx.stats),
        control: Arc::clone(control),
        gate: Arc::new(CycleGate::new()),
        polling: ctx.config.polling.clone(),
    };

    let (registrar, worker) = worker::spawn(worker_ctx.clone());
    let accept_loop = AcceptLoop {
        transport: ctx.transport.as_ref(),
        store: ctx.store.as_ref(),
        session_options: ctx.config.store.session,
        accept_timeout: ctx.config.polling.accept_timeout(),
    };
    let accepted = accept_loop.run(registrar, &worker_ctx).await;

    let drained = match worker.await {
        Ok(result) => result,
        Err(e) => Err(WorkerError::from(e)),
    };

    accepted?;
    drained?;
    Ok(())
}

/// Drives init → run → teardown cycles until a stop is requested.
pub struct Lifecycle<B> {
    backends: B,
    control: Arc<ControlFlag>,
    config: Arc<ServerConfig>,
    config_path: Option<PathBuf>,
    locks: Arc<LockRegistry>,
    stats: Arc<SessionStats>,
}

impl<B: Backends> Lifecycle<B> {
    pub fn new(backends: B, control: Arc<ControlFlag>, config: ServerConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            backends,
            control,
            config: Arc::new(config),
            config_path,
            locks: Arc::new(LockRegistry::new()),
            stats: Arc::new(SessionStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn locks(&self) -> Arc<LockRegistry> {
        Arc::clone(&self.locks)
    }

    /// Run until stopped. Returns an error when the server has to give up.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        let mut budget = RestartBudget::new(&self.config.lifecycle);
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            let started = Instant::now();
            let bound_before = self.stats.bound();
            let outcome = match ServerContext::init(
                Arc::clone(&self.config),
                &self.backends,
                Arc::clone(&self.locks),
                Arc::clone(&self.stats),
            )
            .await
            {
                Ok(ctx) => {
                    tracing::info!(cycle, "Server running");
                    let outcome = run_cycle(&ctx, &self.control).await;
                    ctx.shutdown().await;
                    outcome.map_err(|e| e.to_string())
                }
                // Nothing to restart from if the very first init fails.
                Err(e) if cycle == 1 => return Err(e.into()),
                Err(e) => Err(e.to_string()),
            };

            // A cycle that served sessions or ran long enough ends the
            // failure streak, whatever ended it.
            if self.stats.bound() > bound_before || started.elapsed() >= budget.healthy_after() {
                budget.record_success();
            }

            match self.control.get() {
                Control::Stop => {
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "Run failed while stopping");
                    }
                    tracing::info!(
                        sessions_served = self.stats.bound(),
                        bind_failures = self.stats.bind_failures(),
                        "Server stopped"
                    );
                    return Ok(());
                }
                Control::Restart => {
                    budget.record_success();
                    metrics::record_restart("signal");
                    tracing::info!(cycle, "Restarting");
                }
                Control::Continue => {
                    let last = outcome.err().unwrap_or_else(|| "run ended without a stop or restart request".into());
                    match budget.record_failure() {
                        Some(delay) => {
                            metrics::record_restart("failure");
                            tracing::error!(
                                error = %last,
                                failures = budget.failures(),
                                delay_ms = delay.as_millis() as u64,
                                "Run failed, restarting"
                            );
                            tokio::time::sleep(delay).await;
                            if self.control.get() == Control::Stop {
                                tracing::info!("Stop requested during restart delay");
                                return Ok(());
                            }
                        }
                        None => {
                            return Err(LifecycleError::TooManyFailures {
                                failures: budget.failures(),
                                last,
                            });
                        }
                    }
                }
            }

            self.reload_config(&mut budget);
            self.control.rearm();
        }
    }

    fn reload_config(&mut self, budget: &mut RestartBudget) {
        let Some(path) = &self.config_path else {
            return;
        };
        match load_config(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Configuration reloaded");
                budget.reconfigure(&config.lifecycle);
                self.config = Arc::new(config);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Configuration reload failed, keeping previous");
            }
        }
    }
}
