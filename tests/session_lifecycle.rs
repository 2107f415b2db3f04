//! Session lifecycle tests against in-memory sessions.
//!
//! Run with: cargo test --test session_lifecycle

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use common::{denied_holder, error_tag, fast_config, is_ok, wait_until, MockBackends};
use netconf_server::config::ServerConfig;
use netconf_server::lifecycle::{Backends, LifecycleError, StartupError};
use netconf_server::net::message::ReplyOutcome;
use netconf_server::net::{SessionStats, Transport};
use netconf_server::store::{StoreBackend, StoreError};
use netconf_server::{ControlFlag, Datastore, Lifecycle, LockRegistry};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    control: Arc<ControlFlag>,
    locks: Arc<LockRegistry>,
    stats: Arc<SessionStats>,
    handle: JoinHandle<Result<(), LifecycleError>>,
}

impl Running {
    async fn stop(self) -> Result<(), LifecycleError> {
        self.control.request_stop();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("lifecycle did not stop")
            .expect("lifecycle task panicked")
    }
}

fn start<B: Backends + 'static>(backends: B, config: ServerConfig) -> Running {
    let control = Arc::new(ControlFlag::new());
    let lifecycle = Lifecycle::new(backends, Arc::clone(&control), config, None);
    let locks = lifecycle.locks();
    let stats = lifecycle.stats();
    Running {
        control,
        locks,
        stats,
        handle: tokio::spawn(lifecycle.run()),
    }
}

#[tokio::test]
async fn test_rejected_bind_closes_session_without_registering() {
    let backends = MockBackends::new(&["mallory"]);
    let server = start(backends.clone(), fast_config());

    let mallory = backends.transport.connect("mallory");
    assert!(wait_until(|| mallory.is_closed(), WAIT).await);
    assert_eq!(server.stats.bind_failures(), 1);
    assert_eq!(server.stats.bound(), 0);

    let mut alice = backends.transport.connect("alice");
    let reply = alice.call("get", json!({})).await;
    assert!(matches!(reply.outcome, ReplyOutcome::Data(_)));
    assert_eq!(server.stats.bound(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_lock_released_when_holder_terminates() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    let mut bob = backends.transport.connect("bob");

    assert!(is_ok(&alice.call("lock", json!({"target": "running"})).await));

    let denied = bob.call("lock", json!({"target": "running"})).await;
    assert_eq!(denied_holder(&denied), Some(alice.id.as_u32()));

    let edit = json!({"target": "running", "config": {"/system/hostname": "r1"}});
    let denied = bob.call("edit-config", edit.clone()).await;
    assert_eq!(error_tag(&denied), Some("lock-denied"));

    alice.hang_up();
    let locks = Arc::clone(&server.locks);
    assert!(wait_until(|| locks.holder(Datastore::Running).is_none(), WAIT).await);

    assert!(is_ok(&bob.call("lock", json!({"target": "running"})).await));
    assert!(is_ok(&bob.call("edit-config", edit).await));
    assert_eq!(server.locks.holder(Datastore::Running), Some(bob.id));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_drains_every_session() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut clients = Vec::new();
    for user in ["alice", "bob", "carol"] {
        let mut client = backends.transport.connect(user);
        assert!(matches!(client.call("get", json!({})).await.outcome, ReplyOutcome::Data(_)));
        clients.push(client);
    }
    assert!(is_ok(&clients[0].call("lock", json!({"target": "candidate"})).await));

    let stats = Arc::clone(&server.stats);
    let locks = Arc::clone(&server.locks);
    server.stop().await.unwrap();

    assert!(clients.iter().all(|c| c.is_closed()));
    assert_eq!(stats.bound(), 3);
    assert_eq!(stats.torn_down(), 3);
    assert_eq!(stats.live(), 0);
    assert!(locks.holder(Datastore::Candidate).is_none());
    assert_eq!(backends.transport.shutdowns(), 1);
    assert!(!backends.store.is_connected());
}

#[tokio::test]
async fn test_restart_reinitialises_with_empty_locks() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    let mut bob = backends.transport.connect("bob");
    let mut carol = backends.transport.connect("carol");
    assert!(is_ok(&alice.call("lock", json!({"target": "candidate"})).await));
    assert!(is_ok(
        &bob.call("edit-config", json!({"target": "running", "config": {"/system/hostname": "r2"}}))
            .await
    ));
    assert!(matches!(carol.call("get", json!({})).await.outcome, ReplyOutcome::Data(_)));

    server.control.request_restart();
    assert!(wait_until(|| backends.connects() == 2, WAIT).await);
    assert!(wait_until(|| alice.is_closed() && bob.is_closed() && carol.is_closed(), WAIT).await);
    assert!(server.locks.holder(Datastore::Candidate).is_none());
    assert_eq!(server.stats.torn_down(), 3);

    let mut dave = backends.transport.connect("dave");
    assert!(is_ok(&dave.call("lock", json!({"target": "candidate"})).await));
    let reply = dave.call("get-config", json!({"source": "running"})).await;
    match reply.outcome {
        ReplyOutcome::Data(data) => assert_eq!(data["/system/hostname"], json!("r2")),
        other => panic!("unexpected outcome: {:?}", other),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_secondary_channel_shares_lock_identity() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    let mut bob = backends.transport.connect("bob");
    assert!(is_ok(&alice.call("lock", json!({"target": "running"})).await));

    let mut channel = alice.open_channel();
    let edit = json!({"target": "running", "config": {"/system/contact": "noc"}});
    assert!(is_ok(&channel.call("edit-config", edit.clone()).await));

    let denied = bob.call("edit-config", edit).await;
    assert_eq!(denied_holder(&denied), Some(alice.id.as_u32()));

    // The group's binding outlives its primary session.
    alice.hang_up();
    assert!(wait_until(|| alice.is_closed(), WAIT).await);
    assert!(matches!(channel.call("get", json!({})).await.outcome, ReplyOutcome::Data(_)));
    assert_eq!(server.locks.holder(Datastore::Running), Some(alice.id));
    assert_eq!(server.stats.torn_down(), 0);

    channel.hang_up();
    let locks = Arc::clone(&server.locks);
    assert!(wait_until(|| locks.holder(Datastore::Running).is_none(), WAIT).await);
    assert_eq!(server.stats.torn_down(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_failure_is_isolated() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    let mut bob = backends.transport.connect("bob");
    assert!(is_ok(&alice.call("lock", json!({"target": "startup"})).await));
    assert!(matches!(bob.call("get", json!({})).await.outcome, ReplyOutcome::Data(_)));

    alice.fail();
    assert!(wait_until(|| alice.is_closed(), WAIT).await);
    let locks = Arc::clone(&server.locks);
    assert!(wait_until(|| locks.holder(Datastore::Startup).is_none(), WAIT).await);

    assert!(is_ok(&bob.call("lock", json!({"target": "startup"})).await));
    assert!(!bob.is_closed());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_unknown_requests_get_errors() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    alice.send_malformed("expected value at line 1 column 1");
    let reply = alice.next_reply().await;
    assert_eq!(reply.message_id, None);
    assert_eq!(error_tag(&reply), Some("malformed-message"));

    let reply = alice.call("frobnicate", json!({})).await;
    assert_eq!(error_tag(&reply), Some("operation-not-supported"));

    let reply = alice.call("reboot", json!({"delay": 5})).await;
    match reply.outcome {
        ReplyOutcome::Data(data) => {
            assert_eq!(data["rpc"], json!("reboot"));
            assert_eq!(data["user"], json!("alice"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert!(!alice.is_closed());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_close_session_releases_locks() {
    let backends = MockBackends::new(&[]);
    let server = start(backends.clone(), fast_config());

    let mut alice = backends.transport.connect("alice");
    assert!(is_ok(&alice.call("lock", json!({"target": "candidate"})).await));
    assert!(is_ok(&alice.call("close-session", json!({})).await));

    assert!(wait_until(|| alice.is_closed(), WAIT).await);
    let stats = Arc::clone(&server.stats);
    assert!(wait_until(|| stats.torn_down() == 1, WAIT).await);
    assert!(server.locks.holder(Datastore::Candidate).is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_accept_failure_restarts_the_server() {
    let backends = MockBackends::new(&[]);
    backends.transport.fail_accepts(1);
    let server = start(backends.clone(), fast_config());

    assert!(wait_until(|| backends.connects() == 2, WAIT).await);

    let mut alice = backends.transport.connect("alice");
    assert!(is_ok(&alice.call("lock", json!({"target": "running"})).await));

    server.stop().await.unwrap();
    assert_eq!(backends.transport.shutdowns(), 2);
}

#[tokio::test]
async fn test_repeated_accept_failures_give_up() {
    let backends = MockBackends::new(&[]);
    backends.transport.fail_accepts(u32::MAX);
    let mut config = fast_config();
    config.lifecycle.max_consecutive_failures = 2;
    config.lifecycle.restart_backoff_max_ms = 5000;
    let server = start(backends.clone(), config);

    let result = tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("lifecycle did not give up")
        .expect("lifecycle task panicked");

    match result {
        Err(LifecycleError::TooManyFailures { failures, .. }) => assert_eq!(failures, 3),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(backends.connects(), 3);
}

#[tokio::test]
async fn test_serving_cycle_resets_failure_streak() {
    let backends = MockBackends::new(&[]);
    backends.transport.fail_accepts(1);
    let mut config = fast_config();
    config.lifecycle.max_consecutive_failures = 1;
    config.lifecycle.restart_backoff_max_ms = 5000;
    let server = start(backends.clone(), config);

    assert!(wait_until(|| backends.connects() == 2, WAIT).await);
    let mut alice = backends.transport.connect("alice");
    assert!(is_ok(&alice.call("lock", json!({"target": "running"})).await));

    // Second isolated failure, after a cycle that served a session.
    backends.transport.fail_accepts(1);
    assert!(wait_until(|| backends.connects() == 3, WAIT).await);
    assert!(wait_until(|| alice.is_closed(), WAIT).await);

    let mut bob = backends.transport.connect("bob");
    assert!(is_ok(&bob.call("lock", json!({"target": "running"})).await));
    assert!(!server.handle.is_finished());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_server_stops_promptly() {
    let backends = MockBackends::new(&[]);
    let mut config = fast_config();
    config.polling.accept_timeout_ms = 100;
    config.polling.poll_timeout_ms = 100;
    config.polling.idle_backoff_ms = 20;
    let server = start(backends.clone(), config);

    assert!(wait_until(|| backends.transport.accepts() > 0, WAIT).await);
    let before = backends.transport.accepts();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let idle_accepts = backends.transport.accepts() - before;
    assert!(idle_accepts <= 5, "{} accept calls while idle", idle_accepts);

    let started = std::time::Instant::now();
    server.stop().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "stop took {:?}",
        started.elapsed()
    );
    assert_eq!(backends.transport.shutdowns(), 1);
    assert!(!backends.store.is_connected());
}

struct UnreachableStore;

#[async_trait]
impl Backends for UnreachableStore {
    async fn connect_store(&self, _config: &ServerConfig) -> Result<Arc<dyn StoreBackend>, StartupError> {
        Err(StartupError::StoreConnect(StoreError::Disconnected))
    }

    async fn open_transport(
        &self,
        _config: &ServerConfig,
        _capabilities: Vec<String>,
    ) -> Result<Arc<dyn Transport>, StartupError> {
        unreachable!("transport opened without a store")
    }
}

#[tokio::test]
async fn test_first_init_failure_is_fatal() {
    let server = start(UnreachableStore, fast_config());
    let result = tokio::time::timeout(WAIT, server.handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(LifecycleError::Startup(StartupError::StoreConnect(_)))));
}
