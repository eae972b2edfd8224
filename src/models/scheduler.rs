use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::calendar::SessionPhase;

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SchedulerState {
    /// Whether `self -> next` is a legal transition
    ///
    /// Any state may move to FAILED on an unexpected internal error.
    pub fn can_transition_to(self, next: SchedulerState) -> bool {
        use SchedulerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Failed, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Failed, Stopping)
                | (Stopping, Stopped)
                | (_, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "STOPPED",
            SchedulerState::Starting => "STARTING",
            SchedulerState::Running => "RUNNING",
            SchedulerState::Stopping => "STOPPING",
            SchedulerState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Initial,
    ManualStart,
    ManualStop,
    ManualRestart,
    SessionOpened,
    SessionClosed,
    RunnerDegraded,
    AutoRestart,
    InternalError,
    Shutdown,
}

/// Non-blocking snapshot of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// When the current state was entered
    pub since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the scheduler last entered RUNNING (cleared when stopped)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_since: Option<DateTime<Utc>>,
    /// Auto-restarts used in the current session
    pub auto_restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_phase: Option<SessionPhase>,
    /// Next session open, while the session is not OPEN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_open: Option<DateTime<Utc>>,
    pub last_transition_reason: TransitionReason,
}

/// One entry of the transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransitionRecord {
    pub from: SchedulerState,
    pub to: SchedulerState,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

impl SchedulerStatus {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            state: SchedulerState::Stopped,
            since: now,
            last_error: None,
            active_since: None,
            auto_restarts: 0,
            session_phase: None,
            next_open: None,
            last_transition_reason: TransitionReason::Initial,
        }
    }
}
