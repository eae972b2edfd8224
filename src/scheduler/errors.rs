use thiserror::Error;

use crate::models::SchedulerState;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid scheduler transition {from} -> {to}")]
    InvalidTransition {
        from: SchedulerState,
        to: SchedulerState,
    },

    #[error("Pipeline runner degraded after {consecutive_failures} consecutive cycle failures")]
    RunnerDegraded { consecutive_failures: u32 },

    #[error("Internal scheduler error: {0}")]
    Internal(String),
}
