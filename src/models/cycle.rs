use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use utoipa::ToSchema;

/// How an update cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    /// Every symbol was processed
    Completed,
    /// Overall cycle deadline expired; remaining symbols skipped
    TimedOut,
    /// Cancelled by stop/restart; remaining symbols skipped
    Cancelled,
    /// Cycle-fatal error; remaining symbols skipped
    Aborted,
}

/// Immutable summary of one update cycle
///
/// Invariant: `attempted == succeeded + failed + skipped`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CycleResult {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Symbols whose write asked for indicator recomputation
    pub recompute_requested: usize,
    pub bars_written: usize,
    pub duration_ms: u64,
    pub status: CycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleResult {
    pub fn is_balanced(&self) -> bool {
        self.attempted == self.succeeded + self.failed + self.skipped
    }

    /// `(errors, processed)` for error-rate accounting
    ///
    /// Skipped symbols are excluded, except in an aborted cycle where every
    /// symbol that did not succeed counts as an error.
    pub fn error_counts(&self) -> (usize, usize) {
        match self.status {
            CycleStatus::Aborted => (self.attempted.saturating_sub(self.succeeded), self.attempted),
            _ => (self.failed, self.succeeded + self.failed),
        }
    }
}

/// Monotonic pipeline counters, reset only on process restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PipelineCounters {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub total_errors: u64,
    pub total_symbols_processed: u64,
    pub bars_written: u64,
}

impl PipelineCounters {
    /// Fold a finished cycle into the counters
    pub fn record(&mut self, result: &CycleResult, fatal: bool) {
        self.cycles_run += 1;
        if fatal {
            self.cycles_failed += 1;
        }
        let (errors, processed) = result.error_counts();
        self.total_errors += errors as u64;
        self.total_symbols_processed += processed as u64;
        self.bars_written += result.bars_written as u64;
    }
}

/// Bounded ring buffer of cycle results, oldest dropped when full
#[derive(Debug, Clone)]
pub struct CycleHistory {
    results: VecDeque<CycleResult>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            results: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, result: CycleResult) {
        if self.results.len() >= self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result);
    }

    pub fn last(&self) -> Option<&CycleResult> {
        self.results.back()
    }

    /// Most recent `n` results, newest first
    pub fn recent(&self, n: usize) -> Vec<CycleResult> {
        self.results.iter().rev().take(n).cloned().collect()
    }

    /// Error rate over the last `window` cycles
    pub fn recent_error_rate(&self, window: usize) -> f64 {
        let (failed, processed) = self
            .results
            .iter()
            .rev()
            .take(window)
            .fold((0usize, 0usize), |(f, p), r| {
                let (errors, processed) = r.error_counts();
                (f + errors, p + processed)
            });
        if processed == 0 {
            return 0.0;
        }
        failed as f64 / processed as f64
    }

    /// Mean duration of the last `window` cycles
    pub fn recent_mean_duration_ms(&self, window: usize) -> Option<u64> {
        let durations: Vec<u64> = self
            .results
            .iter()
            .rev()
            .take(window)
            .map(|r| r.duration_ms)
            .collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<u64>() / durations.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
