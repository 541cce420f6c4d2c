//! Per-entity batch timing with coarse trend detection. SkipLimit pagination
//! degrades quadratically on large inputs; the trend gives operators the
//! evidence in the metadata without a metrics stack.

use serde::Serialize;
use std::time::Duration;

const SAMPLE_EVERY: u64 = 10;

#[derive(Debug, Default)]
pub struct PerfTracker {
    batches: u64,
    total_ms: u64,
    first_ms: Option<u64>,
    last_ms: u64,
    samples: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaginationMetrics {
    pub strategy: String,
    pub batches: u64,
    pub avg_batch_ms: u64,
    pub trend: &'static str,
}

impl PerfTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.batches += 1;
        self.total_ms += ms;
        self.first_ms.get_or_insert(ms);
        self.last_ms = ms;
        if (self.batches - 1) % SAMPLE_EVERY == 0 {
            self.samples.push(ms);
        }
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn metrics(&self, strategy: &str) -> Option<PaginationMetrics> {
        if self.batches == 0 {
            return None;
        }
        Some(PaginationMetrics {
            strategy: strategy.to_string(),
            batches: self.batches,
            avg_batch_ms: self.total_ms / self.batches,
            trend: self.trend(),
        })
    }

    /// "constant" when first/middle/last samples sit within ±20% of the
    /// first; "exponential" when both half-over-half ratios exceed 1.3;
    /// "linear" otherwise. Too few samples read as constant.
    fn trend(&self) -> &'static str {
        if self.samples.len() < 3 {
            return "constant";
        }
        let first = self.samples[0].max(1) as f64;
        let middle = self.samples[self.samples.len() / 2].max(1) as f64;
        let last = self.samples[self.samples.len() - 1].max(1) as f64;

        if (middle / first - 1.0).abs() <= 0.2 && (last / first - 1.0).abs() <= 0.2 {
            "constant"
        } else if middle / first > 1.3 && last / middle > 1.3 {
            "exponential"
        } else {
            "linear"
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tracker_from(batch_ms: impl IntoIterator<Item = u64>) -> PerfTracker {
        let mut tracker = PerfTracker::new();
        for ms in batch_ms {
            tracker.record_batch(Duration::from_millis(ms));
        }
        tracker
    }

    #[test]
    fn no_batches_means_no_metrics() {
        assert_eq!(PerfTracker::new().metrics("keyset"), None);
    }

    #[test]
    fn averages_and_sampling() {
        let tracker = tracker_from(std::iter::repeat(50).take(25));
        let metrics = tracker.metrics("keyset").unwrap();
        assert_eq!(metrics.batches, 25);
        assert_eq!(metrics.avg_batch_ms, 50);
        // Batches 1, 11, 21 were sampled.
        assert_eq!(tracker.samples, vec![50, 50, 50]);
        assert_eq!(metrics.trend, "constant");
    }

    #[test]
    fn steady_timings_read_constant() {
        let tracker = tracker_from((0..30).map(|_| 100));
        assert_eq!(tracker.metrics("keyset").unwrap().trend, "constant");

        // ±20% of the first sample still reads constant.
        let tracker = tracker_from((0..30).map(|i| if i < 15 { 100 } else { 115 }));
        assert_eq!(tracker.metrics("keyset").unwrap().trend, "constant");
    }

    #[test]
    fn quadratic_growth_reads_exponential() {
        // Samples at batches 1, 11, 21: 1ms, 121ms, 441ms.
        let tracker = tracker_from((1..=30).map(|i: u64| i * i));
        assert_eq!(tracker.metrics("skip_limit").unwrap().trend, "exponential");
    }

    #[test]
    fn mild_growth_reads_linear() {
        // Samples: 100, 150, 160 — middle/first is 1.5 but last/middle is not > 1.3.
        let mut tracker = PerfTracker::new();
        tracker.record_batch(Duration::from_millis(100));
        for _ in 0..9 {
            tracker.record_batch(Duration::from_millis(120));
        }
        tracker.record_batch(Duration::from_millis(150));
        for _ in 0..9 {
            tracker.record_batch(Duration::from_millis(155));
        }
        tracker.record_batch(Duration::from_millis(160));
        assert_eq!(tracker.metrics("keyset").unwrap().trend, "linear");
    }

    #[test]
    fn too_few_samples_read_constant() {
        let tracker = tracker_from([5, 500]);
        assert_eq!(tracker.metrics("keyset").unwrap().trend, "constant");
    }
}
