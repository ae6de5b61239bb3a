//! Adaptive monitor polling.
//!
//! The monitor normally polls at a relaxed baseline. An incident (a worker
//! death, a hang, a failed rebuild) tightens the interval to the fast rate
//! so a repeat failure is caught quickly. Once no incident has happened for
//! the quiet period the interval relaxes, stepping back up to the baseline
//! one doubling at a time.

use std::time::{Duration, Instant};

use tandem_config::SupervisorConfig;

/// Poll-interval policy for the monitor loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    baseline: Duration,
    fast: Duration,
    quiet: Duration,
    last_incident: Option<Instant>,
}

impl PollPolicy {
    /// Creates a policy. `fast` is clamped to at most `baseline`.
    pub fn new(baseline: Duration, fast: Duration, quiet: Duration) -> Self {
        Self {
            baseline,
            fast: fast.min(baseline),
            quiet,
            last_incident: None,
        }
    }

    /// Policy from the supervisor configuration.
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.poll_interval(),
            config.fast_poll_interval(),
            config.quiet_period(),
        )
    }

    /// Steady-state interval.
    pub fn baseline(&self) -> Duration {
        self.baseline
    }

    /// Post-incident interval.
    pub fn fast(&self) -> Duration {
        self.fast
    }

    /// Records an incident at `now`.
    pub fn note_incident(&mut self, now: Instant) {
        self.last_incident = Some(now);
    }

    /// True while the quiet period after the last incident is running.
    pub fn is_tightened(&self, now: Instant) -> bool {
        self.last_incident
            .is_some_and(|at| now.saturating_duration_since(at) < self.quiet)
    }

    /// Interval to wait before the next poll.
    pub fn interval(&self, now: Instant) -> Duration {
        let Some(at) = self.last_incident else {
            return self.baseline;
        };
        let since = now.saturating_duration_since(at);
        if since < self.quiet {
            return self.fast;
        }
        // One doubling per quiet period after the first.
        let periods = if self.quiet.is_zero() {
            u32::MAX
        } else {
            (since.as_nanos() / self.quiet.as_nanos()).min(32) as u32
        };
        let mut interval = self.fast;
        for _ in 0..periods {
            if interval >= self.baseline {
                break;
            }
            interval = interval.saturating_mul(2);
        }
        interval.min(self.baseline)
    }
}
