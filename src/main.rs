//! NETCONF-style management server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      SERVER                          │
//!                 │                                                      │
//!  connection     │  ┌──────────┐   ┌─────────┐   ┌──────────────────┐   │
//!  ───────────────┼─▶│   net    │──▶│ session │──▶│   poll worker    │   │
//!                 │  │ accept   │   │ binding │   │ (one task, all   │   │
//!                 │  │ loop     │   └────┬────┘   │  sessions)       │   │
//!                 │  └──────────┘        │        └────────┬─────────┘   │
//!                 │                      ▼                 ▼             │
//!                 │               ┌────────────┐   ┌──────────────┐      │
//!                 │               │   store    │◀──│  operations  │      │
//!                 │               │  backend   │   │  + datastore │      │
//!                 │               └────────────┘   │    locks     │      │
//!                 │                                └──────────────┘      │
//!                 │  ┌────────────────────────────────────────────────┐  │
//!                 │  │ lifecycle: signals → control flag → restart    │  │
//!                 │  │ config · observability · resilience (backoff)  │  │
//!                 │  └────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use netconf_server::config::loader::load_or_default;
use netconf_server::lifecycle::pidfile::PidFile;
use netconf_server::lifecycle::signals::spawn_signal_handler;
use netconf_server::lifecycle::{ControlFlag, DefaultBackends, Lifecycle};
use netconf_server::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "netconf-server", version, about = "NETCONF-style management server")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbosity: 0 errors, 1 warnings, 2 verbose, 3 debug
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    verbose: Option<u8>,

    /// PID file guarding against a second instance (overrides the config file)
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netconf-server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(args.verbose, &config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "netconf-server starting");

    let pid_path = args.pid_file.clone().or_else(|| config.lifecycle.pid_file.clone());
    let _pid_file = match pid_path.as_deref().map(PidFile::acquire).transpose() {
        Ok(pid_file) => pid_file,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build the async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let control = Arc::new(ControlFlag::new());
        if let Err(e) = spawn_signal_handler(Arc::clone(&control)) {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }

        let lifecycle = Lifecycle::new(DefaultBackends::new(), control, config, args.config);
        match lifecycle.run().await {
            Ok(()) => {
                tracing::info!("Shutdown complete");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "Server failed");
                ExitCode::FAILURE
            }
        }
    })
}
