//! Restart delay after failed runs: exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::LifecycleConfig;

/// Delay before restart number `failures` (1-based) in a failure streak.
pub fn restart_delay(failures: u32, base_ms: u64, max_ms: u64) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(failures - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    // Jitter: 0 to 10% of the delay.
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Consecutive-failure accounting across restart cycles.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    failures: u32,
    max_failures: u32,
    base_ms: u64,
    max_ms: u64,
}

impl RestartBudget {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            failures: 0,
            max_failures: config.max_consecutive_failures,
            base_ms: config.restart_backoff_base_ms,
            max_ms: config.restart_backoff_max_ms,
        }
    }

    /// Pick up new limits after a configuration reload, keeping the streak.
    pub fn reconfigure(&mut self, config: &LifecycleConfig) {
        self.max_failures = config.max_consecutive_failures;
        self.base_ms = config.restart_backoff_base_ms;
        self.max_ms = config.restart_backoff_max_ms;
    }

    /// Count a failed run. Returns the delay before the next attempt, or
    /// `None` once the streak exceeds the budget.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_failures {
            None
        } else {
            Some(restart_delay(self.failures, self.base_ms, self.max_ms))
        }
    }

    /// A clean run ends the streak.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// A run lasting at least this long ends the streak even if it fails.
    pub fn healthy_after(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
