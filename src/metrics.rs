//! Checkpoint outcome and latency accounting
//!
//! One `CheckpointStats` is shared by every writer thread of a job. Latency
//! is the writer-observed wall time of a checkpoint: probe round-trip plus
//! either the ingest send or the direct PFS append. Drain time is
//! deliberately excluded; placement acceptance is the writer's completion
//! signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{CdbbError, Result};

/// Highest latency the histogram can hold (one hour, in microseconds)
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Aggregated checkpoint statistics for one job
pub struct CheckpointStats {
    latencies_us: Mutex<Histogram<u64>>,
    staged: AtomicU64,
    direct: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the aggregates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    /// Checkpoints staged through a burst buffer
    pub staged: u64,
    /// Checkpoints written directly to the PFS
    pub direct: u64,
    /// Checkpoints that failed outright
    pub failed: u64,
    /// Median checkpoint latency in microseconds
    pub p50_us: u64,
    /// Tail checkpoint latency in microseconds
    pub p99_us: u64,
    /// Worst observed checkpoint latency in microseconds
    pub max_us: u64,
}

impl StatsSummary {
    /// Total checkpoints that completed, staged or direct
    pub fn completed(&self) -> u64 {
        self.staged + self.direct
    }
}

impl CheckpointStats {
    /// Create an empty recorder
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)
            .map_err(|err| CdbbError::unexpected(format!("latency histogram: {err}")))?;
        Ok(Self {
            latencies_us: Mutex::new(histogram),
            staged: AtomicU64::new(0),
            direct: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    fn record_latency(&self, elapsed: Duration) {
        let micros = (elapsed.as_micros() as u64).clamp(1, MAX_LATENCY_US);
        if let Err(err) = self.latencies_us.lock().record(micros) {
            warn!(micros, %err, "dropped latency sample");
        }
    }

    /// Count a checkpoint staged through a burst buffer
    pub fn record_staged(&self, elapsed: Duration) {
        self.staged.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    /// Count a checkpoint that fell through to a direct PFS write
    pub fn record_direct(&self, elapsed: Duration) {
        self.direct.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    /// Count a checkpoint that failed
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current aggregates
    pub fn summary(&self) -> StatsSummary {
        let latencies = self.latencies_us.lock();
        StatsSummary {
            staged: self.staged.load(Ordering::Relaxed),
            direct: self.direct.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            p50_us: latencies.value_at_quantile(0.5),
            p99_us: latencies.value_at_quantile(0.99),
            max_us: latencies.max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_outcome() {
        let stats = CheckpointStats::new().unwrap();
        stats.record_staged(Duration::from_millis(2));
        stats.record_staged(Duration::from_millis(4));
        stats.record_direct(Duration::from_millis(8));
        stats.record_failure();

        let summary = stats.summary();
        assert_eq!(summary.staged, 2);
        assert_eq!(summary.direct, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed(), 3);
    }

    #[test]
    fn test_latency_percentiles_are_ordered() {
        let stats = CheckpointStats::new().unwrap();
        for millis in [1, 2, 3, 50] {
            stats.record_staged(Duration::from_millis(millis));
        }
        let summary = stats.summary();
        assert!(summary.p50_us <= summary.p99_us);
        assert!(summary.p99_us <= summary.max_us);
        assert!(summary.max_us >= 49_000);
    }

    #[test]
    fn test_zero_duration_clamps_into_range() {
        let stats = CheckpointStats::new().unwrap();
        stats.record_direct(Duration::ZERO);
        assert_eq!(stats.summary().direct, 1);
    }
}
