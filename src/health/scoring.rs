use chrono::{DateTime, Utc};

use crate::calendar::SessionPhase;
use crate::config::{HealthThresholds, HealthWeights};
use crate::models::{ComponentScore, HealthComponents, HealthScore, SchedulerState};
use crate::pipeline::RunnerHealthView;

/// Credit that stays at 1 up to `threshold` and decays linearly to 0 at `ceiling`
pub fn linear_credit(value: f64, threshold: f64, ceiling: f64) -> f64 {
    if value <= threshold {
        return 1.0;
    }
    if value >= ceiling || ceiling <= threshold {
        return 0.0;
    }
    1.0 - (value - threshold) / (ceiling - threshold)
}

/// Pure scoring of one health sample
#[derive(Debug, Clone)]
pub struct HealthScorer {
    weights: HealthWeights,
    thresholds: HealthThresholds,
}

impl HealthScorer {
    pub fn new(weights: HealthWeights, thresholds: HealthThresholds) -> Self {
        Self {
            weights,
            thresholds,
        }
    }

    pub fn score(
        &self,
        state: SchedulerState,
        phase: SessionPhase,
        view: &RunnerHealthView,
        now: DateTime<Utc>,
    ) -> HealthScore {
        let components = HealthComponents {
            running_state: self.running_state(state, phase),
            error_rate: self.error_rate(view),
            freshness: self.freshness(state, phase, view, now),
            performance: self.performance(view),
        };

        HealthScore {
            score: components.aggregate(),
            components,
            scheduler_state: state,
            session_phase: phase,
            sampled_at: now,
        }
    }

    fn running_state(&self, state: SchedulerState, phase: SessionPhase) -> ComponentScore {
        let open = phase.is_open();
        let expected = if open {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        };

        let credit = match state {
            s if s == expected => 1.0,
            SchedulerState::Starting | SchedulerState::Stopping => 0.5,
            SchedulerState::Running | SchedulerState::Failed if !open => 0.5,
            _ => 0.0,
        };

        ComponentScore::new(
            credit,
            self.weights.running_state,
            format!("{} during {} (expected {})", state, phase, expected),
        )
    }

    fn error_rate(&self, view: &RunnerHealthView) -> ComponentScore {
        if view.cycles_run == 0 {
            return ComponentScore::new(1.0, self.weights.error_rate, "no cycles yet");
        }
        let rate = view.recent_error_rate;
        let credit = linear_credit(
            rate,
            self.thresholds.error_rate_threshold,
            self.thresholds.error_rate_ceiling,
        );
        ComponentScore::new(
            credit,
            self.weights.error_rate,
            format!("recent error rate {:.1}%", rate * 100.0),
        )
    }

    fn freshness(
        &self,
        state: SchedulerState,
        phase: SessionPhase,
        view: &RunnerHealthView,
        now: DateTime<Utc>,
    ) -> ComponentScore {
        let weight = self.weights.freshness;
        if !phase.is_open() && state != SchedulerState::Running {
            return ComponentScore::new(1.0, weight, format!("not expected to sync ({})", phase));
        }

        let staleness = chrono::Duration::seconds(self.thresholds.staleness_secs as i64);
        let stale = view
            .sync_states
            .iter()
            .filter(|s| match s.staleness(now) {
                Some(age) => age > staleness,
                None => s.total_failures > 0,
            })
            .count();

        let age_credit = match view.freshest_age(now) {
            Some(age) => linear_credit(
                age.num_milliseconds().max(0) as f64 / 1000.0,
                self.thresholds.staleness_secs as f64,
                self.thresholds.staleness_ceiling_secs as f64,
            ),
            // Nothing succeeded yet: only penalize once something has failed
            None if stale > 0 => 0.0,
            None => 1.0,
        };

        let total = view.sync_states.len();
        let stale_fraction = if total == 0 {
            0.0
        } else {
            stale as f64 / total as f64
        };

        let detail = match view.freshest_age(now) {
            Some(age) => format!(
                "freshest bar {}s old, {}/{} symbols stale",
                age.num_seconds(),
                stale,
                total
            ),
            None => format!("no successful sync yet, {}/{} symbols stale", stale, total),
        };
        ComponentScore::new(age_credit * (1.0 - stale_fraction), weight, detail)
    }

    fn performance(&self, view: &RunnerHealthView) -> ComponentScore {
        match view.recent_mean_duration_ms {
            Some(mean) => ComponentScore::new(
                linear_credit(
                    mean as f64,
                    self.thresholds.cycle_sla_ms as f64,
                    self.thresholds.cycle_sla_ceiling_ms as f64,
                ),
                self.weights.performance,
                format!("mean cycle {}ms (SLA {}ms)", mean, self.thresholds.cycle_sla_ms),
            ),
            None => ComponentScore::new(1.0, self.weights.performance, "no cycles yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriorityTier, Symbol, SymbolSyncState};

    fn scorer() -> HealthScorer {
        HealthScorer::new(HealthWeights::default(), HealthThresholds::default())
    }

    fn now() -> DateTime<Utc> {
        "2024-03-13T15:00:00Z".parse().unwrap()
    }

    fn state(id: &str, success_secs_ago: Option<i64>, failures: u64) -> SymbolSyncState {
        let mut state = SymbolSyncState::new(&Symbol::new(id, PriorityTier::Standard));
        state.last_success_at = success_secs_ago.map(|s| now() - chrono::Duration::seconds(s));
        state.total_failures = failures;
        state
    }

    fn view(states: Vec<SymbolSyncState>) -> RunnerHealthView {
        RunnerHealthView {
            running: true,
            degraded: false,
            cycles_run: 5,
            recent_error_rate: 0.0,
            recent_mean_duration_ms: Some(1_000),
            sync_states: states,
        }
    }

    #[test]
    fn test_linear_credit_is_monotonic() {
        assert_eq!(linear_credit(0.01, 0.05, 0.5), 1.0);
        assert_eq!(linear_credit(0.05, 0.05, 0.5), 1.0);
        assert!((linear_credit(0.275, 0.05, 0.5) - 0.5).abs() < 1e-9);
        assert_eq!(linear_credit(0.5, 0.05, 0.5), 0.0);
        assert_eq!(linear_credit(0.9, 0.05, 0.5), 0.0);

        let mut last = 1.0;
        for i in 0..100 {
            let credit = linear_credit(i as f64 / 100.0, 0.05, 0.5);
            assert!(credit <= last);
            last = credit;
        }
    }

    #[test]
    fn test_running_state_credit() {
        let s = scorer();
        use SchedulerState::*;
        use SessionPhase::*;

        assert_eq!(s.running_state(Running, Open).credit, 1.0);
        assert_eq!(s.running_state(Stopped, Closed).credit, 1.0);
        assert_eq!(s.running_state(Stopped, ClosedAfterHours).credit, 1.0);
        assert_eq!(s.running_state(Starting, Open).credit, 0.5);
        assert_eq!(s.running_state(Stopping, Closed).credit, 0.5);
        assert_eq!(s.running_state(Running, PreOpen).credit, 0.5);
        assert_eq!(s.running_state(Failed, Closed).credit, 0.5);
        assert_eq!(s.running_state(Stopped, Open).credit, 0.0);
        assert_eq!(s.running_state(Failed, Open).credit, 0.0);
    }

    #[test]
    fn test_healthy_sample_scores_full() {
        let v = view(vec![state("SPY", Some(30), 0), state("QQQ", Some(45), 0)]);
        let score = scorer().score(SchedulerState::Running, SessionPhase::Open, &v, now());
        assert!((score.score - 100.0).abs() < 1e-9);
        assert_eq!(score.scheduler_state, SchedulerState::Running);
    }

    #[test]
    fn test_error_rate_past_threshold_lowers_credit() {
        let mut v = view(vec![state("SPY", Some(30), 0)]);
        v.recent_error_rate = 0.2;
        let low = scorer().error_rate(&v).credit;
        v.recent_error_rate = 0.4;
        let lower = scorer().error_rate(&v).credit;
        assert!(low < 1.0);
        assert!(lower < low);
    }

    #[test]
    fn test_freshness_stale_minority_lowers_credit() {
        let v = view(vec![
            state("SPY", Some(10), 0),
            state("QQQ", None, 3),
            state("AAPL", Some(10), 0),
            state("MSFT", Some(900), 1),
        ]);
        let f = scorer().freshness(SchedulerState::Running, SessionPhase::Open, &v, now());
        assert!((f.credit - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_decays_with_age() {
        let fresh = view(vec![state("SPY", Some(60), 0)]);
        let aging = view(vec![state("SPY", Some(1_000), 0)]);
        let s = scorer();
        let a = s.freshness(SchedulerState::Running, SessionPhase::Open, &fresh, now());
        let b = s.freshness(SchedulerState::Running, SessionPhase::Open, &aging, now());
        assert_eq!(a.credit, 1.0);
        // Single symbol is also stale, so the product hits zero
        assert_eq!(b.credit, 0.0);
    }

    #[test]
    fn test_freshness_full_credit_when_closed_and_stopped() {
        let v = view(vec![state("SPY", Some(50_000), 2)]);
        let f = scorer().freshness(SchedulerState::Stopped, SessionPhase::Closed, &v, now());
        assert_eq!(f.credit, 1.0);
    }

    #[test]
    fn test_freshness_without_any_attempt_is_full() {
        let v = view(vec![state("SPY", None, 0)]);
        let f = scorer().freshness(SchedulerState::Running, SessionPhase::Open, &v, now());
        assert_eq!(f.credit, 1.0);
    }

    #[test]
    fn test_performance_against_sla() {
        let s = scorer();
        let mut v = view(vec![]);
        assert_eq!(s.performance(&v).credit, 1.0);
        v.recent_mean_duration_ms = Some(75_000);
        assert!((s.performance(&v).credit - 0.5).abs() < 1e-9);
        v.recent_mean_duration_ms = None;
        assert_eq!(s.performance(&v).credit, 1.0);
    }
}
