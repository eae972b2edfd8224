use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::metrics::LatencyStats;
use crate::models::{
    CycleResult, CycleStatus, PipelineCounters, SchedulerStatus, SymbolSyncState,
};

/// Compact view of the most recent cycle
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub status: CycleStatus,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl From<&CycleResult> for CycleSummary {
    fn from(result: &CycleResult) -> Self {
        Self {
            cycle_id: result.cycle_id,
            status: result.status,
            attempted: result.attempted,
            succeeded: result.succeeded,
            failed: result.failed,
            skipped: result.skipped,
            duration_ms: result.duration_ms,
            finished_at: result.finished_at,
        }
    }
}

/// Scheduler status plus pipeline progress
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub runner_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_summary: Option<CycleSummary>,
    pub counters: PipelineCounters,
}

/// Query parameters for the cycle list
#[derive(Debug, Deserialize)]
pub struct CycleQuery {
    #[serde(default = "default_cycle_limit")]
    pub limit: usize,
}

fn default_cycle_limit() -> usize {
    20
}

/// Recent cycle results, newest first
#[derive(Debug, Serialize, ToSchema)]
pub struct CycleListResponse {
    pub cycles: Vec<CycleResult>,
    pub count: usize,
    pub latency: Vec<LatencyStats>,
}

/// Per-symbol sync state
#[derive(Debug, Serialize, ToSchema)]
pub struct SymbolListResponse {
    pub symbols: Vec<SymbolSyncState>,
    pub count: usize,
    /// Symbols currently below their configured tier
    pub demoted: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
