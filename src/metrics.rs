use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-stage execution counters.
///
/// Clones share the underlying counters, so a pipeline and the thread
/// running the stage observe the same numbers.
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    aborted: Arc<AtomicU64>,
    latency_ns: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, elapsed: Duration) {
        self.latency_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Items that completed the stage normally
    pub fn total_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Items whose transform failed
    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Items that ended their traversal at this stage by aborting
    pub fn total_aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Mean transform latency in microseconds
    pub fn mean_latency_us(&self) -> f64 {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.latency_ns.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
    }
}

/// A point-in-time view of one stage's counters, including its input
/// queue's overflow counts
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub dropped: u64,
    pub blocked: u64,
    pub mean_latency_us: f64,
}

impl MetricsSnapshot {
    /// Format as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Failed: {}, Aborted: {}, Dropped: {}, Blocked: {}, Mean latency: {:.2}µs",
            self.processed, self.failed, self.aborted, self.dropped, self.blocked, self.mean_latency_us
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = StageMetrics::new();
        for _ in 0..100 {
            metrics.record_processed();
            metrics.record_latency(Duration::from_micros(5));
        }
        metrics.record_failed();
        metrics.record_aborted();
        assert_eq!(metrics.total_processed(), 100);
        assert_eq!(metrics.total_failed(), 1);
        assert_eq!(metrics.total_aborted(), 1);
        assert!((metrics.mean_latency_us() - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StageMetrics::new();
        let clone = metrics.clone();
        clone.record_processed();
        assert_eq!(metrics.total_processed(), 1);
    }

    #[test]
    fn test_snapshot_format() {
        let snapshot = MetricsSnapshot {
            processed: 3,
            failed: 0,
            aborted: 1,
            dropped: 2,
            blocked: 0,
            mean_latency_us: 1.5,
        };
        assert!(snapshot.format().contains("Processed: 3"));
    }
}
