//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers once per process
//! - Translate signals into control-flag transitions
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT, SIGTERM, SIGQUIT and SIGABRT stop; a second one exits immediately
//! - SIGHUP and SIGUSR1 restart (which also reloads the config file)

use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::lifecycle::control::{ControlFlag, SignalClass, Transition};

/// Install the handlers and spawn the task that applies them to `control`.
pub fn spawn_signal_handler(control: Arc<ControlFlag>) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigabrt = signal(SignalKind::from_raw(Signal::SIGABRT as i32))?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            let (name, class) = tokio::select! {
                Some(()) = sigint.recv() => ("SIGINT", SignalClass::Terminate),
                Some(()) = sigterm.recv() => ("SIGTERM", SignalClass::Terminate),
                Some(()) = sigquit.recv() => ("SIGQUIT", SignalClass::Terminate),
                Some(()) = sigabrt.recv() => ("SIGABRT", SignalClass::Terminate),
                Some(()) = sighup.recv() => ("SIGHUP", SignalClass::Restart),
                Some(()) = sigusr1.recv() => ("SIGUSR1", SignalClass::Restart),
                else => break,
            };

            match control.apply(class) {
                Transition::StopRequested => {
                    tracing::info!(signal = name, "Received termination signal, stopping");
                }
                Transition::RestartRequested => {
                    tracing::info!(signal = name, "Received restart signal, restarting");
                }
                Transition::ForceExit => {
                    tracing::error!(signal = name, "Termination signal received twice, exiting immediately");
                    std::process::exit(1);
                }
            }
        }
    }))
}
