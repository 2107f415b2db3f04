//! Structured logging.
//!
//! `RUST_LOG` always wins. Otherwise the CLI verbosity (0 errors, 1 warnings,
//! 2 verbose, 3 debug) is used, falling back to the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a numeric verbosity level onto a tracing level name.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

/// Build the filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: Option<u8>, configured_level: &str) -> String {
    let level = verbosity.map(level_for_verbosity).unwrap_or(configured_level);
    format!("netconf_server={level},nms_cli={level}")
}

/// Initialize the global tracing subscriber.
pub fn init_logging(verbosity: Option<u8>, configured_level: &str) {
    let fallback = default_directive(verbosity, configured_level);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
