//! Shared utilities for integration tests: an in-memory transport whose
//! sessions are driven by test clients, and backends wiring it to a
//! memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use netconf_server::config::ServerConfig;
use netconf_server::lifecycle::{Backends, StartupError};
use netconf_server::net::message::{Reply, ReplyOutcome, Request};
use netconf_server::net::{ProtocolSession, SessionEvent, SessionId, SessionStatus, Transport, TransportError};
use netconf_server::store::{MemoryStore, SchemaInfo, StoreBackend};

/// Configuration with short waits so tests run quickly.
pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.polling.accept_timeout_ms = 20;
    config.polling.poll_timeout_ms = 20;
    config.polling.idle_backoff_ms = 5;
    config.polling.termination_cooldown_ms = 1;
    config.lifecycle.restart_backoff_base_ms = 10;
    config.lifecycle.restart_backoff_max_ms = 50;
    config
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

enum ClientInput {
    Rpc(Request),
    Malformed(String),
    Channel(MockSession),
    Hangup,
    Fail,
}

/// Server side of an in-memory session.
pub struct MockSession {
    id: SessionId,
    username: String,
    inputs: mpsc::UnboundedReceiver<ClientInput>,
    replies: mpsc::UnboundedSender<Reply>,
    pending_channels: VecDeque<MockSession>,
    status: SessionStatus,
    closed: Arc<AtomicBool>,
}

/// Test side of an in-memory session.
pub struct MockClient {
    pub id: SessionId,
    username: String,
    inputs: mpsc::UnboundedSender<ClientInput>,
    replies: mpsc::UnboundedReceiver<Reply>,
    closed: Arc<AtomicBool>,
    next_message_id: u32,
}

/// Create a connected session/client pair for `username`.
pub fn session_pair(username: &str) -> (MockSession, MockClient) {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let id = SessionId::next();

    let session = MockSession {
        id,
        username: username.to_string(),
        inputs: input_rx,
        replies: reply_tx,
        pending_channels: VecDeque::new(),
        status: SessionStatus::Running,
        closed: Arc::clone(&closed),
    };
    let client = MockClient {
        id,
        username: username.to_string(),
        inputs: input_tx,
        replies: reply_rx,
        closed,
        next_message_id: 1,
    };
    (session, client)
}

impl MockClient {
    /// Send a request and wait for its reply.
    pub async fn call(&mut self, operation: &str, params: Value) -> Reply {
        let message_id = self.next_message_id.to_string();
        self.next_message_id += 1;
        let _ = self
            .inputs
            .send(ClientInput::Rpc(Request::new(message_id.clone(), operation, params)));
        let reply = self.next_reply().await;
        assert_eq!(reply.message_id.as_deref(), Some(message_id.as_str()));
        reply
    }

    pub async fn next_reply(&mut self) -> Reply {
        tokio::time::timeout(Duration::from_secs(5), self.replies.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("session reply channel closed")
    }

    pub fn send_malformed(&self, reason: &str) {
        let _ = self.inputs.send(ClientInput::Malformed(reason.to_string()));
    }

    /// Open a secondary channel on this session.
    pub fn open_channel(&self) -> MockClient {
        let (session, client) = session_pair(&self.username);
        let _ = self.inputs.send(ClientInput::Channel(session));
        client
    }

    pub fn hang_up(&self) {
        let _ = self.inputs.send(ClientInput::Hangup);
    }

    pub fn fail(&self) {
        let _ = self.inputs.send(ClientInput::Fail);
    }

    /// Whether the server closed this session.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Error tag of a reply, if it is an error.
pub fn error_tag(reply: &Reply) -> Option<&str> {
    match &reply.outcome {
        ReplyOutcome::RpcError(body) => Some(body.tag.as_str()),
        _ => None,
    }
}

pub fn is_ok(reply: &Reply) -> bool {
    matches!(reply.outcome, ReplyOutcome::Ok(()))
}

/// Lock holder reported by a `lock-denied` reply.
pub fn denied_holder(reply: &Reply) -> Option<u32> {
    match &reply.outcome {
        ReplyOutcome::RpcError(body) if body.tag == "lock-denied" => body.session_id,
        _ => None,
    }
}

#[async_trait]
impl ProtocolSession for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    async fn next_event(&mut self) -> SessionEvent {
        if self.status != SessionStatus::Running {
            return SessionEvent::Terminated;
        }
        match self.inputs.recv().await {
            Some(ClientInput::Rpc(request)) => SessionEvent::Rpc(request),
            Some(ClientInput::Malformed(reason)) => SessionEvent::Malformed { reason },
            Some(ClientInput::Channel(channel)) => {
                self.pending_channels.push_back(channel);
                SessionEvent::ChannelRequested
            }
            Some(ClientInput::Fail) => {
                self.status = SessionStatus::Invalid;
                SessionEvent::Failed(TransportError::Io(std::io::Error::other("injected failure")))
            }
            Some(ClientInput::Hangup) | None => {
                self.status = SessionStatus::Terminated;
                SessionEvent::Terminated
            }
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.id));
        }
        let _ = self.replies.send(reply);
        Ok(())
    }

    async fn accept_secondary_channel(&mut self) -> Result<Box<dyn ProtocolSession>, TransportError> {
        self.pending_channels
            .pop_front()
            .map(|channel| Box::new(channel) as Box<dyn ProtocolSession>)
            .ok_or(TransportError::NoPendingChannel(self.id))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::Terminated;
        }
    }
}

/// Transport fed by [`MockTransport::connect`].
pub struct MockTransport {
    incoming_tx: mpsc::UnboundedSender<MockSession>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<MockSession>>,
    failing_accepts: AtomicU32,
    accepts: AtomicU32,
    shutdowns: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
            failing_accepts: AtomicU32::new(0),
            accepts: AtomicU32::new(0),
            shutdowns: AtomicU32::new(0),
        })
    }

    /// Queue a new session for `username` and return its client.
    pub fn connect(&self, username: &str) -> MockClient {
        let (session, client) = session_pair(username);
        let _ = self.incoming_tx.send(session);
        client
    }

    /// Make the next `count` accepts fail hard.
    pub fn fail_accepts(&self, count: u32) {
        self.failing_accepts.store(count, Ordering::SeqCst);
    }

    /// Number of accept calls so far.
    pub fn accepts(&self) -> u32 {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn accept(&self, timeout: Duration) -> Result<Option<Box<dyn ProtocolSession>>, TransportError> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_accepts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Accept(std::io::Error::other("injected accept failure")));
        }

        let mut incoming = self.incoming_rx.lock().await;
        match tokio::time::timeout(timeout, incoming.recv()).await {
            Ok(Some(session)) => Ok(Some(Box::new(session))),
            Ok(None) | Err(_) => Ok(None),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Memory store plus the mock transport, shared across restart cycles.
/// Clones share all state, so a test keeps one while the lifecycle owns another.
#[derive(Clone)]
pub struct MockBackends {
    pub store: MemoryStore,
    pub transport: Arc<MockTransport>,
    connects: Arc<AtomicU32>,
}

impl MockBackends {
    pub fn new(deny_users: &[&str]) -> Self {
        let schemas = vec![SchemaInfo {
            name: "acme-system".into(),
            revision: Some("2024-01-01".into()),
            rpcs: vec!["reboot".into()],
        }];
        Self {
            store: MemoryStore::new(schemas, deny_users.iter().map(|u| u.to_string()).collect()),
            transport: MockTransport::new(),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of cycles that connected to the store.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backends for MockBackends {
    async fn connect_store(&self, _config: &ServerConfig) -> Result<Arc<dyn StoreBackend>, StartupError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.store.connect();
        Ok(Arc::new(self.store.clone()))
    }

    async fn open_transport(
        &self,
        _config: &ServerConfig,
        _capabilities: Vec<String>,
    ) -> Result<Arc<dyn Transport>, StartupError> {
        Ok(Arc::clone(&self.transport) as Arc<dyn Transport>)
    }
}
