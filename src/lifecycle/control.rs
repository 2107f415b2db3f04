//! Process-wide run control.
//!
//! `ControlFlag` is written by the signal task and the lifecycle, and read
//! by the accept loop and the poll worker at the top of every iteration.
//! `CycleGate` is created per run and aborts that run on a fatal error
//! without touching the flag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Requested state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Control {
    Continue = 0,
    Restart = 1,
    Stop = 2,
}

impl Control {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Control::Continue,
            1 => Control::Restart,
            _ => Control::Stop,
        }
    }
}

/// Signal classes the server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    /// SIGINT, SIGTERM, SIGQUIT, SIGABRT.
    Terminate,
    /// SIGHUP, SIGUSR1.
    Restart,
}

/// Snapshot of the control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub flag: Control,
    /// A terminate signal was already received by this process.
    pub stop_signalled: bool,
}

/// What a signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StopRequested,
    RestartRequested,
    /// Second terminate signal: leave immediately with failure status.
    ForceExit,
}

/// Next control state for `signal` arriving in `current`.
pub fn transition(current: ControlState, signal: SignalClass) -> (ControlState, Transition) {
    match signal {
        SignalClass::Terminate if current.stop_signalled => (current, Transition::ForceExit),
        SignalClass::Terminate => (
            ControlState {
                flag: Control::Stop,
                stop_signalled: true,
            },
            Transition::StopRequested,
        ),
        SignalClass::Restart => (
            ControlState {
                flag: Control::Restart,
                ..current
            },
            Transition::RestartRequested,
        ),
    }
}

/// Atomic tri-state flag plus the sticky "stop already signalled" bit.
#[derive(Debug)]
pub struct ControlFlag {
    flag: AtomicU8,
    stop_signalled: AtomicBool,
}

impl Default for ControlFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlag {
    pub fn new() -> Self {
        Self {
            flag: AtomicU8::new(Control::Continue as u8),
            stop_signalled: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> Control {
        Control::from_u8(self.flag.load(Ordering::Acquire))
    }

    pub fn is_continue(&self) -> bool {
        self.get() == Control::Continue
    }

    pub fn state(&self) -> ControlState {
        ControlState {
            flag: self.get(),
            stop_signalled: self.stop_signalled.load(Ordering::Acquire),
        }
    }

    /// Apply a signal. Signals are delivered one at a time by the signal task.
    pub fn apply(&self, signal: SignalClass) -> Transition {
        let (next, outcome) = transition(self.state(), signal);
        self.stop_signalled.store(next.stop_signalled, Ordering::Release);
        self.flag.store(next.flag as u8, Ordering::Release);
        outcome
    }

    /// Ask the server to stop without counting as a terminate signal.
    pub fn request_stop(&self) {
        self.flag.store(Control::Stop as u8, Ordering::Release);
    }

    pub fn request_restart(&self) {
        self.flag.store(Control::Restart as u8, Ordering::Release);
    }

    /// Re-arm to `Continue` for the next cycle. A pending stop wins.
    pub fn rearm(&self) -> bool {
        self.flag
            .compare_exchange(
                Control::Restart as u8,
                Control::Continue as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Abort bit for one run of the accept loop and poll worker.
#[derive(Debug, Default)]
pub struct CycleGate {
    aborted: AtomicBool,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// True while the flag says `Continue` and the run was not aborted.
    pub fn keep_running(&self, control: &ControlFlag) -> bool {
        control.is_continue() && !self.is_aborted()
    }
}
