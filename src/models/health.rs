use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::SessionPhase;
use crate::models::SchedulerState;

/// Alert severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// A previously raised condition cleared
    Resolved,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Resolved => write!(f, "RESOLVED"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Condition an alert is about (cooldown is tracked per code)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCode {
    HealthScoreLow,
    SchedulerFailed,
    DataStale,
}

impl AlertCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCode::HealthScoreLow => "HEALTH_SCORE_LOW",
            AlertCode::SchedulerFailed => "SCHEDULER_FAILED",
            AlertCode::DataStale => "DATA_STALE",
        }
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert produced by the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub code: AlertCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        code: AlertCode,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            code,
            message: message.into(),
            timestamp,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// Score of a single health component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ComponentScore {
    /// Credit earned, 0.0..=1.0
    pub credit: f64,
    pub weight: f64,
    /// `credit * weight`
    pub points: f64,
    pub detail: String,
}

impl ComponentScore {
    pub fn new(credit: f64, weight: f64, detail: impl Into<String>) -> Self {
        let credit = credit.clamp(0.0, 1.0);
        Self {
            credit,
            weight,
            points: credit * weight,
            detail: detail.into(),
        }
    }
}

/// All scored components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthComponents {
    pub running_state: ComponentScore,
    pub error_rate: ComponentScore,
    pub freshness: ComponentScore,
    pub performance: ComponentScore,
}

impl HealthComponents {
    /// Weighted 0–100 score
    pub fn aggregate(&self) -> f64 {
        let parts = [
            &self.running_state,
            &self.error_rate,
            &self.freshness,
            &self.performance,
        ];
        let total_weight: f64 = parts.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return 100.0;
        }
        let points: f64 = parts.iter().map(|c| c.points).sum();
        (points / total_weight * 100.0).clamp(0.0, 100.0)
    }
}

/// Result of one health sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthScore {
    pub score: f64,
    pub components: HealthComponents,
    pub scheduler_state: SchedulerState,
    pub session_phase: SessionPhase,
    pub sampled_at: DateTime<Utc>,
}

/// Compact point of the score history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScorePoint {
    pub score: f64,
    pub sampled_at: DateTime<Utc>,
}
