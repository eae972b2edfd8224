use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::alerts::{AlertEvaluator, AlertRules};
use super::scoring::HealthScorer;
use super::sink::{AlertDeliveryError, AlertSink};
use crate::config::HealthConfig;
use crate::models::{Alert, HealthScore, ScorePoint};
use crate::scheduler::Scheduler;

/// What `/health` returns
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    #[serde(flatten)]
    pub score: HealthScore,
    pub alerts_active: Vec<Alert>,
    /// Oldest first
    pub trend: Vec<ScorePoint>,
}

/// Periodic health sampler
///
/// Features:
/// - Reads scheduler status and a consistent runner view, never blocking either
/// - Weighted 0–100 score (see [`HealthScorer`])
/// - Alert rules with hysteresis and per-code cooldown (see [`AlertEvaluator`])
/// - Best-effort delivery: sink errors and timeouts are logged and dropped
pub struct HealthMonitor {
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn AlertSink>,
    config: HealthConfig,
    scorer: HealthScorer,
    evaluator: Mutex<AlertEvaluator>,
    latest: RwLock<Option<HealthScore>>,
    history: RwLock<VecDeque<ScorePoint>>,
}

impl HealthMonitor {
    pub fn new(scheduler: Arc<Scheduler>, sink: Arc<dyn AlertSink>, config: HealthConfig) -> Self {
        let scorer = HealthScorer::new(config.weights.clone(), config.thresholds.clone());
        let evaluator = AlertEvaluator::new(AlertRules::from(&config));
        let history = VecDeque::with_capacity(config.history_capacity);

        Self {
            scheduler,
            sink,
            config,
            scorer,
            evaluator: Mutex::new(evaluator),
            latest: RwLock::new(None),
            history: RwLock::new(history),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Take one sample at `now`, deliver any resulting alerts, and return the score
    pub async fn sample(&self, now: DateTime<Utc>) -> HealthScore {
        let phase = self.scheduler.calendar().session_phase(now);
        let (state, view) = self
            .scheduler
            .health_inputs(self.config.error_rate_window, self.config.performance_window);

        let score = self.scorer.score(state, phase, &view, now);
        let alerts = self.evaluator.lock().evaluate(&score, now);

        debug!(
            "💓 Health {:.1} (state {}, phase {}, {} alert(s))",
            score.score,
            state,
            phase,
            alerts.len()
        );

        *self.latest.write() = Some(score.clone());
        {
            let mut history = self.history.write();
            if self.config.history_capacity > 0 && history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            if self.config.history_capacity > 0 {
                history.push_back(ScorePoint {
                    score: score.score,
                    sampled_at: now,
                });
            }
        }

        for alert in &alerts {
            self.deliver(alert).await;
        }

        score
    }

    async fn deliver(&self, alert: &Alert) {
        let timeout = self.config.delivery_timeout();
        let result = match tokio::time::timeout(timeout, self.sink.notify(alert)).await {
            Ok(result) => result,
            Err(_) => Err(AlertDeliveryError::Timeout(timeout)),
        };

        match result {
            Ok(()) => info!(
                "📣 {} alert {} delivered via {}",
                alert.severity,
                alert.code,
                self.sink.name()
            ),
            Err(e) => warn!(
                "Failed to deliver {} alert {} via {}: {}",
                alert.severity,
                alert.code,
                self.sink.name(),
                e
            ),
        }
    }

    pub fn latest(&self) -> Option<HealthScore> {
        self.latest.read().clone()
    }

    /// Score history, oldest first
    pub fn history(&self) -> Vec<ScorePoint> {
        self.history.read().iter().copied().collect()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.evaluator.lock().active_alerts()
    }

    /// Latest sample plus active alerts and trend; samples first if nothing was taken yet
    pub async fn report(&self) -> HealthReport {
        let score = match self.latest() {
            Some(score) => score,
            None => self.sample(Utc::now()).await,
        };
        HealthReport {
            score,
            alerts_active: self.active_alerts(),
            trend: self.history(),
        }
    }
}
