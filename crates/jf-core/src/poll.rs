//! Bounded-latency polling.
//!
//! The capture side exposes no wake-up signal, so waiting for upstream
//! production means re-checking a predicate with a fixed sleep in between.
//! Without a deadline the wait is unbounded: a module that stops producing
//! blocks its worker forever. Tests and supervised deployments can set a
//! deadline to turn that into [`CoreError::PollTimeout`].

use crate::error::{CoreError, CoreResult};
use std::time::{Duration, Instant};

/// Sleep interval and optional deadline for a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between probes.
    pub interval: Duration,
    /// Give up after this long. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    /// Poll forever at `interval`.
    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Add a deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Probe until it yields a value.
///
/// `probe` runs once immediately; afterwards the thread sleeps
/// `policy.interval` between probes. The sleep is capped so the deadline is
/// not overshot by more than one probe.
pub fn poll_until<T, F>(policy: &PollPolicy, what: &'static str, mut probe: F) -> CoreResult<T>
where
    F: FnMut() -> Option<T>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }

        let sleep = match policy.deadline {
            Some(deadline) => {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(CoreError::PollTimeout { what, waited });
                }
                policy.interval.min(deadline - waited)
            }
            None => policy.interval,
        };
        std::thread::sleep(sleep);
    }
}
