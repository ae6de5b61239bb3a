//! Supervisor counters and latency histograms.
//!
//! Everything is atomic so the monitor, rebuild threads and status queries
//! can record and read concurrently without locks. Metrics are append-only
//! for the lifetime of a supervisor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

const BUCKETS: usize = 32;

/// Log2-bucketed latency histogram in microseconds.
///
/// Bucket 0 holds `[0, 2)` µs and bucket `i > 0` holds `[2^i, 2^(i+1))` µs.
/// Percentiles report the upper edge of the bucket they fall in, capped at
/// the observed maximum.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }

    fn bucket(us: u64) -> usize {
        if us < 2 {
            0
        } else {
            (63 - us.leading_zeros() as usize).min(BUCKETS - 1)
        }
    }

    /// Records one sample.
    pub fn record(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.buckets[Self::bucket(us)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Largest sample.
    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_us.load(Ordering::Relaxed))
    }

    /// Upper bound of the `q` quantile (`0.0..=1.0`), or zero if empty.
    pub fn percentile(&self, q: f64) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        let rank = ((q.clamp(0.0, 1.0) * count as f64).ceil() as u64).max(1);
        let max = self.max_us.load(Ordering::Relaxed);
        let mut seen = 0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= rank {
                let upper = if i == 0 { 1 } else { (1u64 << (i + 1)) - 1 };
                return Duration::from_micros(upper.min(max));
            }
        }
        Duration::from_micros(max)
    }

    /// Serialisable summary.
    pub fn summary(&self) -> LatencySummary {
        let count = self.count();
        LatencySummary {
            count,
            mean_us: self
                .sum_us
                .load(Ordering::Relaxed)
                .checked_div(count)
                .unwrap_or(0),
            p50_us: self.percentile(0.50).as_micros() as u64,
            p95_us: self.percentile(0.95).as_micros() as u64,
            p99_us: self.percentile(0.99).as_micros() as u64,
            max_us: self.max().as_micros() as u64,
        }
    }
}

/// Percentile summary of one histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    /// Samples recorded.
    pub count: u64,
    /// Mean in microseconds.
    pub mean_us: u64,
    /// Median upper bound.
    pub p50_us: u64,
    /// 95th percentile upper bound.
    pub p95_us: u64,
    /// 99th percentile upper bound.
    pub p99_us: u64,
    /// Largest sample.
    pub max_us: u64,
}

/// Counters and latency histograms for one supervisor session.
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    /// Workers found dead (exited or killed).
    pub crashes: AtomicU64,
    /// Workers found hung (heartbeat stalled).
    pub hangs: AtomicU64,
    /// Active-slot switches caused by a failure.
    pub failovers: AtomicU64,
    /// Workers successfully rebuilt.
    pub replacements: AtomicU64,
    /// Rebuild attempts that failed.
    pub rebuild_failures: AtomicU64,
    /// Patch commits that swapped slots.
    pub commits: AtomicU64,
    /// Commands broadcast to the slots.
    pub commands_broadcast: AtomicU64,
    /// Standby writes dropped because its ring was full.
    pub standby_desyncs: AtomicU64,
    /// Time from last sign of life to detection.
    pub detection: LatencyHistogram,
    /// Time to repoint the active slot.
    pub switch: LatencyHistogram,
    /// Time from rebuild start to the new worker's first heartbeat.
    pub rebuild: LatencyHistogram,
    /// Time from commit start to the slot swap.
    pub commit: LatencyHistogram,
}

impl SupervisorMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Serialisable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            crashes: load(&self.crashes),
            hangs: load(&self.hangs),
            failovers: load(&self.failovers),
            replacements: load(&self.replacements),
            rebuild_failures: load(&self.rebuild_failures),
            commits: load(&self.commits),
            commands_broadcast: load(&self.commands_broadcast),
            standby_desyncs: load(&self.standby_desyncs),
            detection: self.detection.summary(),
            switch: self.switch.summary(),
            rebuild: self.rebuild.summary(),
            commit: self.commit.summary(),
        }
    }
}

/// Point-in-time copy of [`SupervisorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Workers found dead.
    pub crashes: u64,
    /// Workers found hung.
    pub hangs: u64,
    /// Failure-driven switches.
    pub failovers: u64,
    /// Successful rebuilds.
    pub replacements: u64,
    /// Failed rebuild attempts.
    pub rebuild_failures: u64,
    /// Commit swaps.
    pub commits: u64,
    /// Commands broadcast.
    pub commands_broadcast: u64,
    /// Standby writes dropped on a full ring.
    pub standby_desyncs: u64,
    /// Detection latency.
    pub detection: LatencySummary,
    /// Switch latency.
    pub switch: LatencySummary,
    /// Rebuild latency.
    pub rebuild: LatencySummary,
    /// Commit latency.
    pub commit: LatencySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram() {
        let h = LatencyHistogram::new();
        assert_eq!(h.percentile(0.5), Duration::ZERO);
        assert_eq!(h.summary(), LatencySummary::default());
    }

    #[test]
    fn buckets_are_log2() {
        assert_eq!(LatencyHistogram::bucket(0), 0);
        assert_eq!(LatencyHistogram::bucket(1), 0);
        assert_eq!(LatencyHistogram::bucket(2), 1);
        assert_eq!(LatencyHistogram::bucket(3), 1);
        assert_eq!(LatencyHistogram::bucket(1024), 10);
        assert_eq!(LatencyHistogram::bucket(u64::MAX), BUCKETS - 1);
    }

    #[test]
    fn percentiles_bound_samples() {
        let h = LatencyHistogram::new();
        for us in [10, 12, 15, 20, 900] {
            h.record(Duration::from_micros(us));
        }
        assert_eq!(h.count(), 5);
        // 10, 12, 15 share bucket [8, 16); 20 is in [16, 32).
        assert_eq!(h.percentile(0.5), Duration::from_micros(15));
        assert_eq!(h.percentile(0.8), Duration::from_micros(31));
        assert_eq!(h.percentile(1.0), Duration::from_micros(900));
        let s = h.summary();
        assert_eq!(s.max_us, 900);
        assert_eq!(s.mean_us, (10 + 12 + 15 + 20 + 900) / 5);
    }

    #[test]
    fn percentile_capped_at_max() {
        let h = LatencyHistogram::new();
        h.record(Duration::from_micros(5));
        assert_eq!(h.percentile(0.99), Duration::from_micros(5));
    }

    #[test]
    fn snapshot_counts() {
        let m = SupervisorMetrics::new();
        SupervisorMetrics::bump(&m.failovers);
        SupervisorMetrics::bump(&m.crashes);
        SupervisorMetrics::bump(&m.crashes);
        m.switch.record(Duration::from_micros(3));
        let s = m.snapshot();
        assert_eq!(s.failovers, 1);
        assert_eq!(s.crashes, 2);
        assert_eq!(s.switch.count, 1);
    }
}
