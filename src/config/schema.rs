//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! default every field, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::{SchemaInfo, SessionOptions};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, hello timeout).
    pub listener: ListenerConfig,

    /// Accept and poll cadence.
    pub polling: PollingConfig,

    /// Configuration-store backend settings.
    pub store: StoreConfig,

    /// Restart behaviour and single-instance guard.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// With-defaults capability advertised in the hello.
    pub with_defaults: WithDefaultsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:6001").
    pub bind_address: String,

    /// Seconds a new connection has to send its hello.
    pub hello_timeout_secs: u64,

    /// Longest accepted line, newline included.
    pub max_message_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6001".to_string(),
            hello_timeout_secs: 10,
            max_message_bytes: 1024 * 1024,
        }
    }
}

/// Accept Loop and Poll Worker timings, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Upper bound of one accept wait.
    pub accept_timeout_ms: u64,

    /// Upper bound of one wait across live sessions.
    pub poll_timeout_ms: u64,

    /// Pause while no session is registered.
    pub idle_backoff_ms: u64,

    /// Pause after removing a terminated session.
    pub termination_cooldown_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            accept_timeout_ms: 500,
            poll_timeout_ms: 500,
            idle_backoff_ms: 50,
            termination_cooldown_ms: 5,
        }
    }
}

impl PollingConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn termination_cooldown(&self) -> Duration {
        Duration::from_millis(self.termination_cooldown_ms)
    }
}

/// Configuration-store backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file with initial `running` and `startup` content.
    pub seed_path: Option<PathBuf>,

    /// Users the store refuses to open sessions for.
    pub deny_users: Vec<String>,

    /// Schema modules installed in the store.
    pub modules: Vec<SchemaInfo>,

    /// Options applied to every user session.
    pub session: SessionOptions,
}

/// Restart behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Base delay before restarting after a failed run.
    pub restart_backoff_base_ms: u64,

    /// Upper bound of the restart delay.
    pub restart_backoff_max_ms: u64,

    /// Failed runs in a row before the server gives up.
    pub max_consecutive_failures: u32,

    /// PID file guarding against a second instance.
    pub pid_file: Option<PathBuf>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_backoff_base_ms: 100,
            restart_backoff_max_ms: 5_000,
            max_consecutive_failures: 5,
            pid_file: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// With-defaults retrieval modes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WithDefaultsConfig {
    pub basic_mode: String,
    pub also_supported: Vec<String>,
}

impl Default for WithDefaultsConfig {
    fn default() -> Self {
        Self {
            basic_mode: "explicit".to_string(),
            also_supported: vec![
                "report-all".to_string(),
                "report-all-tagged".to_string(),
                "trim".to_string(),
            ],
        }
    }
}
