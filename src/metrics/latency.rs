use hdrhistogram::{CreationError, Histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Longest trackable duration: one hour, in microseconds
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Latency tracker for cycle and per-symbol sync durations using HDR Histogram
/// HDR Histograms provide accurate percentile calculations with minimal memory
pub struct CycleLatencyTracker {
    /// Whole update cycle
    cycle_us: Histogram<u64>,

    /// One symbol fetch + write, retries included
    symbol_us: Histogram<u64>,
}

impl CycleLatencyTracker {
    pub fn new() -> Result<Self, CreationError> {
        // 1µs to 1 hour, 3 significant figures
        Ok(Self {
            cycle_us: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)?,
            symbol_us: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)?,
        })
    }

    /// Record a cycle duration (values beyond the bounds are clamped)
    #[inline]
    pub fn record_cycle(&mut self, elapsed: Duration) {
        self.cycle_us.saturating_record(as_micros(elapsed));
    }

    #[inline]
    pub fn record_symbol(&mut self, elapsed: Duration) {
        self.symbol_us.saturating_record(as_micros(elapsed));
    }

    pub fn cycle_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("cycle", &self.cycle_us)
    }

    pub fn symbol_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("symbol", &self.symbol_us)
    }

    pub fn all_stats(&self) -> Vec<LatencyStats> {
        vec![self.cycle_stats(), self.symbol_stats()]
    }
}

fn as_micros(elapsed: Duration) -> u64 {
    (elapsed.as_micros() as u64).clamp(1, MAX_TRACKABLE_US)
}

/// Percentile summary, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub metric_name: String,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub sample_count: u64,
}

impl LatencyStats {
    fn from_histogram(name: &str, histogram: &Histogram<u64>) -> Self {
        let ms = |us: u64| us as f64 / 1000.0;
        if histogram.is_empty() {
            return Self {
                metric_name: name.to_string(),
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                max_ms: 0.0,
                mean_ms: 0.0,
                sample_count: 0,
            };
        }
        Self {
            metric_name: name.to_string(),
            p50_ms: ms(histogram.value_at_percentile(50.0)),
            p95_ms: ms(histogram.value_at_percentile(95.0)),
            p99_ms: ms(histogram.value_at_percentile(99.0)),
            max_ms: ms(histogram.max()),
            mean_ms: histogram.mean() / 1000.0,
            sample_count: histogram.len(),
        }
    }
}
