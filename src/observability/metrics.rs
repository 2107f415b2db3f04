//! Metrics collection and exposition.
//!
//! # Metrics
//! - `netconf_sessions_bound_total` (counter)
//! - `netconf_sessions_torn_down_total` (counter)
//! - `netconf_bind_failures_total` (counter)
//! - `netconf_live_sessions` (gauge)
//! - `netconf_lock_attempts_total` (counter): by datastore, outcome
//! - `netconf_rpcs_total` (counter): by operation, outcome
//! - `netconf_restarts_total` (counter): by reason
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests never need the exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::datastore::Datastore;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_bound() {
    counter!("netconf_sessions_bound_total").increment(1);
}

pub fn record_session_teardown() {
    counter!("netconf_sessions_torn_down_total").increment(1);
}

pub fn record_bind_failure() {
    counter!("netconf_bind_failures_total").increment(1);
}

pub fn set_live_sessions(live: u64) {
    gauge!("netconf_live_sessions").set(live as f64);
}

pub fn record_lock_attempt(ds: Datastore, granted: bool) {
    let outcome = if granted { "granted" } else { "denied" };
    counter!("netconf_lock_attempts_total", "datastore" => ds.as_str(), "outcome" => outcome).increment(1);
}

pub fn record_rpc(operation: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("netconf_rpcs_total", "operation" => operation.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_restart(reason: &'static str) {
    counter!("netconf_restarts_total", "reason" => reason).increment(1);
}
