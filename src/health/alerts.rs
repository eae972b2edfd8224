use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::HealthConfig;
use crate::models::{Alert, AlertCode, AlertSeverity, HealthScore, SchedulerState};

/// Raise/clear thresholds and cooldown for the alert rules
#[derive(Debug, Clone)]
pub struct AlertRules {
    pub low_watermark: f64,
    pub recovery_watermark: f64,
    pub freshness_alert_below: f64,
    pub freshness_clear_at: f64,
    pub cooldown: Duration,
}

impl From<&HealthConfig> for AlertRules {
    fn from(config: &HealthConfig) -> Self {
        Self {
            low_watermark: config.low_watermark,
            recovery_watermark: config.recovery_watermark,
            freshness_alert_below: config.freshness_alert_below,
            freshness_clear_at: config.freshness_clear_at,
            cooldown: config.alert_cooldown(),
        }
    }
}

#[derive(Debug, Default)]
struct RuleState {
    /// Condition currently holds (after hysteresis)
    active: bool,
    /// At least one alert went out for the current activation
    announced: bool,
    last_emitted: Option<DateTime<Utc>>,
    last_alert: Option<Alert>,
}

/// Turns health samples into alerts
///
/// Each rule keeps its own hysteresis state and cooldown; a sustained
/// condition is re-announced at most once per cooldown window, and a cleared
/// condition that was announced produces a RESOLVED alert right away.
pub struct AlertEvaluator {
    rules: AlertRules,
    states: HashMap<AlertCode, RuleState>,
}

impl AlertEvaluator {
    pub fn new(rules: AlertRules) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    /// Evaluate every rule against `score`, returning alerts to deliver
    pub fn evaluate(&mut self, score: &HealthScore, now: DateTime<Utc>) -> Vec<Alert> {
        let mut out = Vec::new();

        let low = self.is_active(AlertCode::HealthScoreLow);
        let score_low = if low {
            score.score < self.rules.recovery_watermark
        } else {
            score.score < self.rules.low_watermark
        };
        self.step(AlertCode::HealthScoreLow, score_low, score, now, &mut out);

        let failed_in_session =
            score.scheduler_state == SchedulerState::Failed && score.session_phase.is_open();
        self.step(
            AlertCode::SchedulerFailed,
            failed_in_session,
            score,
            now,
            &mut out,
        );

        let freshness = score.components.freshness.credit;
        let stale = if self.is_active(AlertCode::DataStale) {
            freshness < self.rules.freshness_clear_at
        } else {
            freshness < self.rules.freshness_alert_below
        };
        self.step(AlertCode::DataStale, stale, score, now, &mut out);

        out
    }

    fn is_active(&self, code: AlertCode) -> bool {
        self.states.get(&code).is_some_and(|s| s.active)
    }

    fn step(
        &mut self,
        code: AlertCode,
        holds: bool,
        score: &HealthScore,
        now: DateTime<Utc>,
        out: &mut Vec<Alert>,
    ) {
        let cooldown = self.rules.cooldown;
        let state = self.states.entry(code).or_default();
        let was_active = state.active;
        state.active = holds;

        if holds {
            let due = state.last_emitted.map_or(true, |at| {
                (now - at).to_std().is_ok_and(|elapsed| elapsed >= cooldown)
            });
            if !due {
                if !was_active {
                    debug!("{} raised within cooldown, pending", code);
                }
                return;
            }
            let alert = raise_alert(code, score, now);
            state.announced = true;
            state.last_emitted = Some(now);
            state.last_alert = Some(alert.clone());
            out.push(alert);
        } else if was_active {
            if state.announced {
                out.push(
                    Alert::new(
                        AlertSeverity::Resolved,
                        code,
                        format!("{} cleared", code),
                        now,
                    )
                    .with_context("score", format!("{:.1}", score.score)),
                );
            }
            state.announced = false;
            state.last_alert = None;
        }
    }

    /// Announced alerts whose condition still holds
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .states
            .values()
            .filter(|s| s.active)
            .filter_map(|s| s.last_alert.clone())
            .collect();
        alerts.sort_by_key(|a| a.code);
        alerts
    }
}

fn raise_alert(code: AlertCode, score: &HealthScore, now: DateTime<Utc>) -> Alert {
    let (severity, message) = match code {
        AlertCode::HealthScoreLow => (
            AlertSeverity::Critical,
            format!("Health score {:.1} below watermark", score.score),
        ),
        AlertCode::SchedulerFailed => (
            AlertSeverity::Critical,
            format!("Scheduler FAILED during {} session", score.session_phase),
        ),
        AlertCode::DataStale => (
            AlertSeverity::Warning,
            format!(
                "Market data stale: {}",
                score.components.freshness.detail
            ),
        ),
    };

    Alert::new(severity, code, message, now)
        .with_context("score", format!("{:.1}", score.score))
        .with_context("scheduler_state", score.scheduler_state)
        .with_context("session_phase", score.session_phase.as_str())
        .with_context(
            "freshness",
            format!("{:.2}", score.components.freshness.credit),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::SessionPhase;
    use crate::models::{ComponentScore, HealthComponents};

    fn rules() -> AlertRules {
        AlertRules {
            low_watermark: 50.0,
            recovery_watermark: 60.0,
            freshness_alert_below: 0.9,
            freshness_clear_at: 0.95,
            cooldown: Duration::from_secs(300),
        }
    }

    fn t0() -> DateTime<Utc> {
        "2024-03-13T15:00:00Z".parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(secs)
    }

    fn sample(score: f64, freshness: f64, state: SchedulerState) -> HealthScore {
        let full = |w: f64| ComponentScore::new(1.0, w, "");
        HealthScore {
            score,
            components: HealthComponents {
                running_state: full(40.0),
                error_rate: full(25.0),
                freshness: ComponentScore::new(freshness, 20.0, "test"),
                performance: full(15.0),
            },
            scheduler_state: state,
            session_phase: SessionPhase::Open,
            sampled_at: t0(),
        }
    }

    fn healthy() -> HealthScore {
        sample(100.0, 1.0, SchedulerState::Running)
    }

    fn codes(alerts: &[Alert]) -> Vec<(AlertCode, AlertSeverity)> {
        alerts.iter().map(|a| (a.code, a.severity)).collect()
    }

    #[test]
    fn test_healthy_sample_raises_nothing() {
        let mut eval = AlertEvaluator::new(rules());
        assert!(eval.evaluate(&healthy(), t0()).is_empty());
        assert!(eval.active_alerts().is_empty());
    }

    #[test]
    fn test_low_score_alerts_once_per_cooldown() {
        let mut eval = AlertEvaluator::new(rules());
        let low = sample(30.0, 1.0, SchedulerState::Running);

        let first = eval.evaluate(&low, at(0));
        assert_eq!(
            codes(&first),
            vec![(AlertCode::HealthScoreLow, AlertSeverity::Critical)]
        );

        // Sustained within the window: silent
        for secs in [30, 60, 120, 299] {
            assert!(eval.evaluate(&low, at(secs)).is_empty());
        }

        // Window elapsed and still low: announced again
        let again = eval.evaluate(&low, at(300));
        assert_eq!(again.len(), 1);
        assert_eq!(eval.active_alerts().len(), 1);
    }

    #[test]
    fn test_hysteresis_band_keeps_alert_active() {
        let mut eval = AlertEvaluator::new(rules());
        eval.evaluate(&sample(45.0, 1.0, SchedulerState::Running), at(0));

        // Between the watermarks: neither resolved nor re-raised
        assert!(eval
            .evaluate(&sample(55.0, 1.0, SchedulerState::Running), at(30))
            .is_empty());
        assert_eq!(eval.active_alerts().len(), 1);

        let resolved = eval.evaluate(&sample(61.0, 1.0, SchedulerState::Running), at(60));
        assert_eq!(
            codes(&resolved),
            vec![(AlertCode::HealthScoreLow, AlertSeverity::Resolved)]
        );
        assert!(eval.active_alerts().is_empty());

        // Back into the band from above: no raise
        assert!(eval
            .evaluate(&sample(55.0, 1.0, SchedulerState::Running), at(90))
            .is_empty());
    }

    #[test]
    fn test_reraise_within_cooldown_is_pending_then_announced() {
        let mut eval = AlertEvaluator::new(rules());
        let low = sample(30.0, 1.0, SchedulerState::Running);

        eval.evaluate(&low, at(0));
        eval.evaluate(&healthy(), at(30));

        // Raised again inside the cooldown: pending, not announced
        assert!(eval.evaluate(&low, at(60)).is_empty());
        assert!(eval.active_alerts().is_empty());

        // Cleared while pending: nothing to resolve
        assert!(eval.evaluate(&healthy(), at(90)).is_empty());

        eval.evaluate(&low, at(120));
        let announced = eval.evaluate(&low, at(300));
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_scheduler_failed_is_critical_regardless_of_score() {
        let mut eval = AlertEvaluator::new(rules());
        let failed = sample(95.0, 1.0, SchedulerState::Failed);

        let alerts = eval.evaluate(&failed, at(0));
        assert_eq!(
            codes(&alerts),
            vec![(AlertCode::SchedulerFailed, AlertSeverity::Critical)]
        );
        assert_eq!(
            alerts[0].context.get("scheduler_state").map(String::as_str),
            Some("FAILED")
        );

        let resolved = eval.evaluate(&healthy(), at(10));
        assert_eq!(
            codes(&resolved),
            vec![(AlertCode::SchedulerFailed, AlertSeverity::Resolved)]
        );
    }

    #[test]
    fn test_scheduler_failed_outside_session_is_quiet() {
        let mut eval = AlertEvaluator::new(rules());
        let mut failed = sample(95.0, 1.0, SchedulerState::Failed);
        failed.session_phase = SessionPhase::Closed;
        assert!(eval.evaluate(&failed, at(0)).is_empty());
    }

    #[test]
    fn test_freshness_alert_is_warning_with_own_hysteresis() {
        let mut eval = AlertEvaluator::new(rules());

        let alerts = eval.evaluate(&sample(92.0, 0.8, SchedulerState::Running), at(0));
        assert_eq!(
            codes(&alerts),
            vec![(AlertCode::DataStale, AlertSeverity::Warning)]
        );

        assert!(eval
            .evaluate(&sample(98.0, 0.93, SchedulerState::Running), at(30))
            .is_empty());

        let resolved = eval.evaluate(&sample(99.0, 0.96, SchedulerState::Running), at(60));
        assert_eq!(
            codes(&resolved),
            vec![(AlertCode::DataStale, AlertSeverity::Resolved)]
        );
    }

    #[test]
    fn test_cooldown_is_per_code() {
        let mut eval = AlertEvaluator::new(rules());
        eval.evaluate(&sample(30.0, 1.0, SchedulerState::Running), at(0));

        let alerts = eval.evaluate(&sample(30.0, 0.5, SchedulerState::Failed), at(10));
        assert_eq!(
            codes(&alerts),
            vec![
                (AlertCode::SchedulerFailed, AlertSeverity::Critical),
                (AlertCode::DataStale, AlertSeverity::Warning),
            ]
        );
        assert_eq!(eval.active_alerts().len(), 3);
    }
}
