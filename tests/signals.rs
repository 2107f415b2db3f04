//! Signal handling, in its own test binary since it installs
//! process-wide handlers.
//!
//! Run with: cargo test --test signals

mod common;

use nix::sys::signal::{raise, Signal};
use std::sync::Arc;
use std::time::Duration;

use common::wait_until;
use netconf_server::lifecycle::signals::spawn_signal_handler;
use netconf_server::lifecycle::Control;
use netconf_server::ControlFlag;

#[tokio::test]
async fn test_abort_signal_requests_stop() {
    let control = Arc::new(ControlFlag::new());
    let handler = spawn_signal_handler(Arc::clone(&control)).unwrap();

    raise(Signal::SIGABRT).unwrap();
    let flag = Arc::clone(&control);
    assert!(wait_until(|| flag.get() == Control::Stop, Duration::from_secs(5)).await);

    handler.abort();
}
