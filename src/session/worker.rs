//! The poll worker: one task multiplexing every live session.
//!
//! # Responsibilities
//! - Absorb registrations handed over by the accept loop
//! - Wait across all sessions with a bounded timeout
//! - Dispatch requests, accept secondary channels, reap ended sessions
//! - Drain every session and binding when the run ends
//!
//! # Design Decisions
//! - No per-session tasks; the worker owns the session set outright
//! - Secondary channels join their parent's group and share its binding;
//!   the binding is torn down when the last group member leaves
//! - A session failing is isolated to that session

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::config::PollingConfig;
use crate::datastore::LockRegistry;
use crate::lifecycle::control::{ControlFlag, CycleGate};
use crate::net::connection::SessionStats;
use crate::net::message::Reply;
use crate::net::transport::{ProtocolSession, SessionEvent};
use crate::operations::{OperationContext, OperationRegistry, RpcError};
use crate::session::binding::StoreBinding;

/// Bound on registrations waiting for the worker.
const REGISTRATION_QUEUE: usize = 64;

/// Error ending a run of the poll worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The registration channel closed while the run should continue.
    #[error("registration channel closed while running")]
    RegistrationClosed,

    #[error("poll worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A bound session on its way to the worker.
pub struct Registration {
    pub session: Box<dyn ProtocolSession>,
    pub binding: Arc<StoreBinding>,
}

/// Shared state the worker needs for one run.
#[derive(Clone)]
pub struct WorkerContext {
    pub operations: Arc<OperationRegistry>,
    pub locks: Arc<LockRegistry>,
    pub stats: Arc<SessionStats>,
    pub control: Arc<ControlFlag>,
    pub gate: Arc<CycleGate>,
    pub polling: PollingConfig,
}

/// Sending side of the registration channel, held by the accept loop.
#[derive(Clone)]
pub struct Registrar {
    tx: mpsc::Sender<Registration>,
}

impl Registrar {
    /// Hand a bound session to the worker. Returns it when the worker is gone.
    pub async fn register(&self, registration: Registration) -> Result<(), Registration> {
        self.tx.send(registration).await.map_err(|e| e.0)
    }
}

/// Start the worker task for one run.
pub fn spawn(ctx: WorkerContext) -> (Registrar, JoinHandle<Result<(), WorkerError>>) {
    let (tx, rx) = mpsc::channel(REGISTRATION_QUEUE);
    let worker = PollWorker {
        ctx,
        rx,
        members: Vec::new(),
    };
    (Registrar { tx }, tokio::spawn(worker.run()))
}

struct Member {
    session: Box<dyn ProtocolSession>,
    binding: Arc<StoreBinding>,
}

enum Wake {
    Registration(Option<Registration>),
    Event(usize, SessionEvent),
    Timeout,
}

struct PollWorker {
    ctx: WorkerContext,
    rx: mpsc::Receiver<Registration>,
    members: Vec<Member>,
}

impl PollWorker {
    async fn run(mut self) -> Result<(), WorkerError> {
        tracing::debug!("Poll worker started");
        let result = self.poll_loop().await;
        if result.is_err() {
            self.ctx.gate.abort();
        }
        self.drain().await;
        tracing::debug!("Poll worker stopped");
        result
    }

    /// The registration channel is gone: fine when the run is ending anyway.
    fn registrations_closed(&self) -> Result<(), WorkerError> {
        if self.ctx.gate.keep_running(&self.ctx.control) {
            Err(WorkerError::RegistrationClosed)
        } else {
            Ok(())
        }
    }

    async fn poll_loop(&mut self) -> Result<(), WorkerError> {
        while self.ctx.gate.keep_running(&self.ctx.control) {
            loop {
                match self.rx.try_recv() {
                    Ok(registration) => self.admit(registration),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return self.registrations_closed(),
                }
            }

            if self.members.is_empty() {
                match tokio::time::timeout(self.ctx.polling.idle_backoff(), self.rx.recv()).await {
                    Ok(Some(registration)) => self.admit(registration),
                    Ok(None) => return self.registrations_closed(),
                    Err(_) => {}
                }
                continue;
            }

            let wake = {
                let mut waits: FuturesUnordered<_> = self
                    .members
                    .iter_mut()
                    .enumerate()
                    .map(|(index, member)| async move { (index, member.session.next_event().await) })
                    .collect();

                tokio::select! {
                    registration = self.rx.recv() => Wake::Registration(registration),
                    Some((index, event)) = waits.next() => Wake::Event(index, event),
                    _ = tokio::time::sleep(self.ctx.polling.poll_timeout()) => Wake::Timeout,
                }
            };

            match wake {
                Wake::Registration(Some(registration)) => self.admit(registration),
                Wake::Registration(None) => return self.registrations_closed(),
                Wake::Event(index, event) => self.handle_event(index, event).await,
                Wake::Timeout => {}
            }
        }
        Ok(())
    }

    fn admit(&mut self, registration: Registration) {
        tracing::debug!(
            session_id = %registration.session.id(),
            username = %registration.session.username(),
            live_sessions = self.members.len() + 1,
            "Session registered"
        );
        self.members.push(Member {
            session: registration.session,
            binding: registration.binding,
        });
    }

    async fn handle_event(&mut self, index: usize, event: SessionEvent) {
        match event {
            SessionEvent::Rpc(request) => {
                let member = &mut self.members[index];
                let dispatched = {
                    let mut guard = member.binding.handle().await;
                    let dispatched = match guard.as_mut() {
                        Some(handle) => {
                            let mut op_ctx = OperationContext {
                                session: member.binding.owner(),
                                locks: &self.ctx.locks,
                                store: handle.as_mut(),
                            };
                            Some(self.ctx.operations.dispatch(&mut op_ctx, &request).await)
                        }
                        None => None,
                    };
                    dispatched
                };

                let (reply, close_session) = match dispatched {
                    Some(dispatched) => (dispatched.reply, dispatched.close_session),
                    None => {
                        let err = RpcError::OperationFailed("store session already closed".into());
                        (Reply::error(Some(request.message_id), &err), true)
                    }
                };

                let replied = member.session.reply(reply).await;
                if let Err(e) = replied {
                    tracing::warn!(session_id = %member.session.id(), error = %e, "Failed to send reply");
                    self.remove(index).await;
                } else if close_session {
                    tracing::info!(session_id = %member.session.id(), "Session closed on request");
                    self.remove(index).await;
                }
            }
            SessionEvent::Malformed { reason } => {
                let member = &mut self.members[index];
                tracing::debug!(session_id = %member.session.id(), reason = %reason, "Malformed message");
                let reply = Reply::error(None, &RpcError::Malformed(reason));
                if let Err(e) = member.session.reply(reply).await {
                    tracing::warn!(session_id = %member.session.id(), error = %e, "Failed to send reply");
                    self.remove(index).await;
                }
            }
            SessionEvent::ChannelRequested => {
                let member = &mut self.members[index];
                match member.session.accept_secondary_channel().await {
                    Ok(channel) => {
                        tracing::info!(
                            session_id = %member.binding.owner(),
                            channel_id = %channel.id(),
                            "Secondary channel joined session group"
                        );
                        let binding = Arc::clone(&member.binding);
                        self.members.push(Member { session: channel, binding });
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %member.session.id(), error = %e, "Failed to accept secondary channel");
                    }
                }
            }
            SessionEvent::Terminated => {
                tracing::info!(session_id = %self.members[index].session.id(), "Session terminated");
                self.remove(index).await;
                tokio::time::sleep(self.ctx.polling.termination_cooldown()).await;
            }
            SessionEvent::Failed(e) => {
                tracing::warn!(session_id = %self.members[index].session.id(), error = %e, "Session failed");
                self.remove(index).await;
                tokio::time::sleep(self.ctx.polling.termination_cooldown()).await;
            }
        }
    }

    /// Remove a member; tear down its binding if it was the last of its group.
    async fn remove(&mut self, index: usize) {
        let mut member = self.members.swap_remove(index);
        member.session.close().await;
        self.release(member.binding).await;
    }

    async fn release(&mut self, binding: Arc<StoreBinding>) {
        let shared = self.members.iter().any(|m| Arc::ptr_eq(&m.binding, &binding));
        if !shared {
            binding.teardown(&self.ctx.locks, &self.ctx.stats).await;
        }
    }

    /// Close every session and tear down every binding, including sessions
    /// still queued in the registration channel.
    async fn drain(&mut self) {
        self.rx.close();
        while let Ok(registration) = self.rx.try_recv() {
            self.admit(registration);
        }

        let count = self.members.len();
        while let Some(mut member) = self.members.pop() {
            member.session.close().await;
            self.release(member.binding).await;
        }
        if count > 0 {
            tracing::info!(sessions = count, "Poll worker drained sessions");
        }
    }
}
