use hdrhistogram::{CreationError, Histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Largest latency the histogram tracks: 60 seconds
const MAX_TRACKABLE_NS: u64 = 60_000_000_000;

/// Percentile summary of a latency histogram
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub metric_name: String,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub max_ns: u64,
    pub min_ns: u64,
    pub mean_ns: f64,
    pub sample_count: u64,
}

/// HDR histogram of transport send latency
///
/// Values are clamped into [1ns, 60s] so a stalled send is still recorded.
pub struct LatencyTracker {
    name: &'static str,
    histogram: Histogram<u64>,
}

impl LatencyTracker {
    /// 1ns to 60 seconds, 3 significant figures
    pub fn new(name: &'static str) -> Result<Self, CreationError> {
        Ok(Self {
            name,
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_NS, 3)?,
        })
    }

    #[inline]
    pub fn record(&mut self, elapsed: Duration) {
        let nanos = (elapsed.as_nanos() as u64).clamp(1, MAX_TRACKABLE_NS);
        let _ = self.histogram.record(nanos);
    }

    pub fn stats(&self) -> LatencyStats {
        if self.histogram.is_empty() {
            return LatencyStats {
                metric_name: self.name.to_string(),
                ..Default::default()
            };
        }

        LatencyStats {
            metric_name: self.name.to_string(),
            p50_ns: self.histogram.value_at_percentile(50.0),
            p95_ns: self.histogram.value_at_percentile(95.0),
            p99_ns: self.histogram.value_at_percentile(99.0),
            p999_ns: self.histogram.value_at_percentile(99.9),
            max_ns: self.histogram.max(),
            min_ns: self.histogram.min(),
            mean_ns: self.histogram.mean(),
            sample_count: self.histogram.len(),
        }
    }

    pub fn reset(&mut self) {
        self.histogram.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_reports_zeroes() {
        let tracker = LatencyTracker::new("send").unwrap();
        let stats = tracker.stats();

        assert_eq!(stats.metric_name, "send");
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.max_ns, 0);
    }

    #[test]
    fn test_percentiles_follow_samples() {
        let mut tracker = LatencyTracker::new("send").unwrap();

        for micros in 1..=100 {
            tracker.record(Duration::from_micros(micros));
        }

        let stats = tracker.stats();
        assert_eq!(stats.sample_count, 100);
        assert!(stats.p50_ns >= 49_000 && stats.p50_ns <= 51_000);
        assert!(stats.max_ns >= 99_000);
        assert!(stats.min_ns <= 1_001);
    }

    #[test]
    fn test_zero_and_huge_samples_are_clamped() {
        let mut tracker = LatencyTracker::new("send").unwrap();

        tracker.record(Duration::ZERO);
        tracker.record(Duration::from_secs(3600));

        assert_eq!(tracker.stats().sample_count, 2);

        tracker.reset();
        assert_eq!(tracker.stats().sample_count, 0);
    }
}
