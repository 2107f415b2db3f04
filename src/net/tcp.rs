//! Line-delimited JSON transport over TCP.
//!
//! # Responsibilities
//! - Bind the configured listener and accept connections in a background task
//! - Run each hello exchange in its own task and allocate session IDs
//! - Route attach hellos to their parent session as secondary channels
//! - Frame requests and replies as one JSON document per line, up to a size limit

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::ListenerConfig;
use crate::net::connection::{SessionId, SessionStatus};
use crate::net::message::{encode_line, ClientMessage, Reply, ServerHello, ServerMessage};
use crate::net::transport::{ProtocolSession, SessionEvent, Transport, TransportError};

/// Established sessions waiting for the Accept Loop.
const READY_QUEUE: usize = 64;

type Accepted = Result<TcpSession, TransportError>;

/// Primary sessions that accept secondary channels.
type ChannelRoutes = Arc<DashMap<SessionId, ChannelRoute>>;

struct ChannelRoute {
    username: String,
    tx: mpsc::UnboundedSender<TcpSession>,
}

/// TCP listener producing [`TcpSession`]s.
///
/// A background task owns the listener. Hellos are exchanged in per-connection
/// tasks, so a slow or silent peer never holds up other connections.
pub struct TcpTransport {
    local_addr: SocketAddr,
    ready: Mutex<mpsc::Receiver<Accepted>>,
    acceptor: JoinHandle<()>,
    routes: ChannelRoutes,
}

impl TcpTransport {
    /// Bind to the configured address and start accepting.
    pub async fn bind(config: &ListenerConfig, capabilities: Vec<String>) -> Result<Self, TransportError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            TransportError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;

        tracing::info!(address = %local_addr, "Listener bound");

        let routes: ChannelRoutes = Arc::new(DashMap::new());
        let handshake = Arc::new(Handshake {
            capabilities: Arc::new(capabilities),
            hello_timeout: Duration::from_secs(config.hello_timeout_secs),
            max_line: config.max_message_bytes,
            routes: Arc::clone(&routes),
        });
        let (tx, rx) = mpsc::channel(READY_QUEUE);
        let acceptor = tokio::spawn(run_acceptor(listener, handshake, tx));

        Ok(Self {
            local_addr,
            ready: Mutex::new(rx),
            acceptor,
            routes,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(e.kind(), ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | TimedOut | WouldBlock)
}

/// Accept connections until the listener breaks or the transport is dropped.
/// Dropping `pending` aborts handshakes still in flight.
async fn run_acceptor(listener: TcpListener, handshake: Arc<Handshake>, ready: mpsc::Sender<Accepted>) {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handshake = Arc::clone(&handshake);
                    let ready = ready.clone();
                    pending.spawn(async move {
                        if let Some(session) = handshake.run(stream, peer).await {
                            let _ = ready.send(Ok(session)).await;
                        }
                    });
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    let _ = ready.send(Err(TransportError::Accept(e))).await;
                    break;
                }
            },
            Some(_) = pending.join_next() => {}
            _ = ready.closed() => break,
        }
    }
}

/// Settings shared by every hello exchange.
struct Handshake {
    capabilities: Arc<Vec<String>>,
    hello_timeout: Duration,
    max_line: usize,
    routes: ChannelRoutes,
}

impl Handshake {
    /// Exchange hellos under the hello timeout. `None` for rejected
    /// connections and for channels handed to their parent session.
    async fn run(&self, stream: TcpStream, peer: SocketAddr) -> Option<TcpSession> {
        match tokio::time::timeout(self.hello_timeout, self.exchange(stream, peer)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!(peer_addr = %peer, error = %e, "Rejected connection");
                None
            }
            Err(_) => {
                tracing::warn!(peer_addr = %peer, "Hello not received in time");
                None
            }
        }
    }

    async fn exchange(&self, stream: TcpStream, peer: SocketAddr) -> Result<Option<TcpSession>, TransportError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        read_line_limited(&mut reader, &mut line, self.max_line).await?;
        if line.len() > self.max_line {
            return Err(TransportError::MessageTooLarge { limit: self.max_line });
        }
        if line.is_empty() {
            return Err(TransportError::Handshake("connection closed before hello".into()));
        }

        let hello = match serde_json::from_slice::<ClientMessage>(&line) {
            Ok(ClientMessage::Hello(hello)) => hello,
            Ok(ClientMessage::Rpc(_)) => return Err(TransportError::Handshake("rpc before hello".into())),
            Err(e) => return Err(TransportError::Handshake(e.to_string())),
        };
        if hello.username.is_empty() {
            return Err(TransportError::Handshake("empty username".into()));
        }

        let id = SessionId::next();
        let mut session = TcpSession {
            id,
            username: hello.username,
            peer,
            reader,
            writer: write_half,
            buf: Vec::new(),
            max_line: self.max_line,
            channel_rx: None,
            pending_channels: VecDeque::new(),
            routes: Arc::clone(&self.routes),
            capabilities: Arc::clone(&self.capabilities),
            status: SessionStatus::Running,
            closed: false,
        };

        if let Some(parent) = hello.attach {
            let parent = SessionId::from_raw(parent);
            let route = self
                .routes
                .get(&parent)
                .ok_or_else(|| TransportError::Handshake(format!("unknown session {}", parent)))?;
            if route.username != session.username {
                return Err(TransportError::Handshake(format!(
                    "user {} cannot attach to session {}",
                    session.username, parent
                )));
            }
            tracing::debug!(session_id = %parent, channel_id = %id, peer_addr = %peer, "Secondary channel requested");
            route
                .tx
                .send(session)
                .map_err(|_| TransportError::Handshake(format!("session {} is closing", parent)))?;
            return Ok(None);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(id, ChannelRoute { username: session.username.clone(), tx });
        session.channel_rx = Some(rx);
        session.send_hello().await?;

        tracing::debug!(session_id = %id, username = %session.username, peer_addr = %peer, "Session established");
        Ok(Some(session))
    }
}

/// Append one line to `buf`, reading at most one byte past `limit`, so an
/// oversized line shows up as `buf.len() > limit`.
async fn read_line_limited(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize> {
    let remaining = (limit + 1).saturating_sub(buf.len()) as u64;
    (&mut *reader).take(remaining).read_until(b'\n', buf).await
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self, timeout: Duration) -> Result<Option<Box<dyn ProtocolSession>>, TransportError> {
        let mut ready = self.ready.lock().await;
        match tokio::time::timeout(timeout, ready.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(session))) => Ok(Some(Box::new(session))),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(TransportError::Accept(std::io::Error::other("acceptor stopped"))),
        }
    }

    async fn shutdown(&self) {
        self.acceptor.abort();
        self.routes.clear();
    }
}

/// One TCP connection carrying a protocol session or a secondary channel.
pub struct TcpSession {
    id: SessionId,
    username: String,
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Partial line carried across cancelled reads.
    buf: Vec<u8>,
    max_line: usize,
    /// Present on primary sessions only.
    channel_rx: Option<mpsc::UnboundedReceiver<TcpSession>>,
    pending_channels: VecDeque<TcpSession>,
    routes: ChannelRoutes,
    capabilities: Arc<Vec<String>>,
    status: SessionStatus,
    closed: bool,
}

enum Wake {
    Read(std::io::Result<usize>),
    Channel(TcpSession),
}

async fn recv_channel(rx: &mut Option<mpsc::UnboundedReceiver<TcpSession>>) -> Option<TcpSession> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl TcpSession {
    async fn send(&mut self, message: &ServerMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed(self.id));
        }
        let line = encode_line(message)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn send_hello(&mut self) -> Result<(), TransportError> {
        let hello = ServerMessage::Hello(ServerHello {
            session_id: self.id.as_u32(),
            capabilities: self.capabilities.as_ref().clone(),
        });
        self.send(&hello).await
    }
}

#[async_trait]
impl ProtocolSession for TcpSession {
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
        loop {
            if self.status != SessionStatus::Running {
                return SessionEvent::Terminated;
            }

            // Partial input stays in self.buf, so dropping this future
            // mid-line loses nothing.
            let wake = tokio::select! {
                res = read_line_limited(&mut self.reader, &mut self.buf, self.max_line) => Wake::Read(res),
                Some(channel) = recv_channel(&mut self.channel_rx) => Wake::Channel(channel),
            };

            match wake {
                Wake::Channel(channel) => {
                    self.pending_channels.push_back(channel);
                    return SessionEvent::ChannelRequested;
                }
                Wake::Read(Err(e)) => {
                    self.status = SessionStatus::Invalid;
                    return SessionEvent::Failed(TransportError::Io(e));
                }
                Wake::Read(Ok(_)) if self.buf.len() > self.max_line => {
                    self.buf = Vec::new();
                    self.status = SessionStatus::Invalid;
                    return SessionEvent::Failed(TransportError::MessageTooLarge { limit: self.max_line });
                }
                Wake::Read(Ok(_)) if self.buf.last() != Some(&b'\n') => {
                    // EOF, possibly after a truncated line.
                    self.status = SessionStatus::Terminated;
                    return SessionEvent::Terminated;
                }
                Wake::Read(Ok(_)) => {
                    let line = std::mem::take(&mut self.buf);
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return match serde_json::from_slice::<ClientMessage>(&line) {
                        Ok(ClientMessage::Rpc(request)) => SessionEvent::Rpc(request),
                        Ok(ClientMessage::Hello(_)) => SessionEvent::Malformed {
                            reason: "hello already exchanged".into(),
                        },
                        Err(e) => SessionEvent::Malformed { reason: e.to_string() },
                    };
                }
            }
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), TransportError> {
        let result = self.send(&ServerMessage::RpcReply(reply)).await;
        if result.is_err() && !self.closed {
            self.status = SessionStatus::Invalid;
        }
        result
    }

    async fn accept_secondary_channel(&mut self) -> Result<Box<dyn ProtocolSession>, TransportError> {
        let mut channel = self
            .pending_channels
            .pop_front()
            .ok_or(TransportError::NoPendingChannel(self.id))?;
        channel.send_hello().await?;
        tracing::debug!(session_id = %self.id, channel_id = %channel.id, peer_addr = %channel.peer, "Secondary channel accepted");
        Ok(Box::new(channel))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::Terminated;
        }
        if self.channel_rx.take().is_some() {
            self.routes.remove(&self.id);
        }
        for mut channel in self.pending_channels.drain(..) {
            let _ = channel.writer.shutdown().await;
        }
        let _ = self.writer.shutdown().await;
        tracing::trace!(session_id = %self.id, peer_addr = %self.peer, "Session closed");
    }
}
