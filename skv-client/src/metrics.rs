//! # Node Metrics
//!
//! Lightweight counters and a latency histogram kept per cluster node, so
//! callers can derive command rate, error rate and tail latency.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array.
//! 3. **Plain Snapshots**: Expose point-in-time values as plain structs.
//!
//! ## Notes
//! - Bucket boundaries are expressed in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 14] = [
    50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 200_000, 500_000,
    1_000_000,
];

/// Snapshot of one node's metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Commands sent to the node (each attempt counts).
    pub commands_total: u64,
    /// Attempts that ended in an error.
    pub errors_total: u64,
    /// Attempts that were retried after a retryable error.
    pub retries_total: u64,
    /// Commands currently awaiting a reply.
    pub inflight: u64,
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

impl LatencySnapshot {
    /// Upper bucket bound under which `quantile` of the samples fall.
    ///
    /// Returns `None` with no samples, or when the quantile lands in the
    /// overflow bucket.
    pub fn quantile_upper_bound_us(&self, quantile: f64) -> Option<u64> {
        if self.samples == 0 {
            return None;
        }
        let target = ((self.samples as f64) * quantile.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (idx, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                return self.bounds_us.get(idx).copied();
            }
        }
        None
    }
}

/// Thread-safe metrics aggregator for one node.
///
/// `Ordering::Relaxed` is enough: fields are read independently.
pub struct Metrics {
    commands_total: AtomicU64,
    errors_total: AtomicU64,
    retries_total: AtomicU64,
    inflight: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates an aggregator with custom ascending bucket bounds (microseconds).
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        Metrics {
            commands_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    pub fn record_command_start(&self) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_end(&self, latency: Duration) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_total: self.commands_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Bucket selection is a linear scan; the bound list is short.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);
        let idx = self
            .bounds_us
            .iter()
            .position(|bound| micros <= *bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_and_overflow() {
        let histogram = LatencyHistogram::new(vec![10, 100]);
        histogram.record(Duration::from_micros(5));
        histogram.record(Duration::from_micros(10));
        histogram.record(Duration::from_micros(50));
        histogram.record(Duration::from_millis(5));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.buckets, vec![2, 1, 1]);
        assert_eq!(snapshot.samples, 4);
        assert_eq!(snapshot.sum_us, 5 + 10 + 50 + 5_000);
    }

    #[test]
    fn test_quantile_upper_bound() {
        let histogram = LatencyHistogram::new(vec![10, 100]);
        for _ in 0..9 {
            histogram.record(Duration::from_micros(1));
        }
        histogram.record(Duration::from_micros(90));
        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.quantile_upper_bound_us(0.5), Some(10));
        assert_eq!(snapshot.quantile_upper_bound_us(1.0), Some(100));
        assert_eq!(LatencyHistogram::new(vec![1]).snapshot().quantile_upper_bound_us(0.5), None);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_command_start();
        metrics.record_command_start();
        metrics.record_command_end(Duration::from_micros(70));
        metrics.record_error();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commands_total, 2);
        assert_eq!(snapshot.inflight, 1);
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.retries_total, 1);
        assert_eq!(snapshot.latency.samples, 1);
    }
}
