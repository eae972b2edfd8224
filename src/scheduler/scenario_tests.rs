//! Cross-component scenarios: scheduler, runner, calendar and health monitor together

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::Scheduler;
use crate::calendar::MarketCalendar;
use crate::config::{CalendarConfig, HealthConfig, PipelineConfig, SchedulerConfig};
use crate::health::HealthMonitor;
use crate::models::{AlertCode, AlertSeverity, PriorityTier, SchedulerState, TransitionReason};
use crate::pipeline::PipelineRunner;
use crate::testing::{self, RecordingAlertSink, RecordingSink, ScriptedSource, SymbolScript};

/// Wednesday 11:00 New York
fn open() -> DateTime<Utc> {
    "2024-03-13T15:00:00Z".parse().unwrap()
}

/// Wednesday 17:00 New York
fn closed() -> DateTime<Utc> {
    "2024-03-13T21:00:00Z".parse().unwrap()
}

fn after(start: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    start + chrono::Duration::seconds(secs)
}

struct Harness {
    source: Arc<ScriptedSource>,
    scheduler: Arc<Scheduler>,
    alerts: Arc<RecordingAlertSink>,
    monitor: HealthMonitor,
}

fn harness(scheduler_config: SchedulerConfig) -> Harness {
    let mut pipeline = PipelineConfig::default();
    pipeline.retry.initial_delay_ms = 1;
    pipeline.retry.max_delay_ms = 2;

    let source = Arc::new(ScriptedSource::new());
    let runner = PipelineRunner::new(
        Arc::new(testing::ten_symbol_catalog()),
        source.clone(),
        Arc::new(RecordingSink::new()),
        pipeline,
    )
    .unwrap();
    let calendar = MarketCalendar::new(&CalendarConfig::default()).unwrap();
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(runner),
        Arc::new(calendar),
        scheduler_config,
        Duration::from_secs(60),
    ));

    let alerts = Arc::new(RecordingAlertSink::new());
    let monitor = HealthMonitor::new(scheduler.clone(), alerts.clone(), HealthConfig::default());

    Harness {
        source,
        scheduler,
        alerts,
        monitor,
    }
}

#[tokio::test]
async fn failing_critical_symbols_are_demoted_and_freshness_drops() {
    let h = harness(SchedulerConfig::default());
    h.source
        .script("SPY", SymbolScript::AlwaysFail("upstream 500".to_string()));
    h.source
        .script("QQQ", SymbolScript::AlwaysFail("upstream 500".to_string()));

    for i in 0..3 {
        let state = h.scheduler.on_tick(after(open(), i * 60)).await;
        assert_eq!(state, SchedulerState::Running);
    }

    let runner = h.scheduler.runner();
    assert_eq!(runner.counters().cycles_run, 3);
    for state in runner.sync_states() {
        match state.symbol.as_str() {
            "SPY" | "QQQ" => {
                assert_eq!(state.original_tier, PriorityTier::Critical);
                assert_eq!(state.effective_tier, PriorityTier::Standard);
                assert_eq!(state.consecutive_failures, 3);
            }
            _ => assert!(state.last_success_at.is_some()),
        }
    }
    for cycle in runner.recent_cycles(3) {
        assert!(cycle.is_balanced());
        assert_eq!(cycle.failed, 2);
        assert_eq!(cycle.succeeded, 8);
    }

    let score = h.monitor.sample(after(open(), 150)).await;
    assert_eq!(score.components.running_state.credit, 1.0);
    assert!(score.components.freshness.credit < 1.0);
    assert!(h
        .alerts
        .alerts()
        .iter()
        .any(|a| a.code == AlertCode::DataStale && a.severity == AlertSeverity::Warning));
    assert!(!h
        .alerts
        .alerts()
        .iter()
        .any(|a| a.code == AlertCode::SchedulerFailed));
}

#[tokio::test]
async fn synced_symbols_go_stale_once_cycles_stop_landing() {
    let h = harness(SchedulerConfig::default());
    assert_eq!(h.scheduler.on_tick(open()).await, SchedulerState::Running);

    let synced_at = h.scheduler.runner().sync_states()[0]
        .last_success_at
        .unwrap();
    assert!(synced_at >= open() && synced_at < after(open(), 5));

    let score = h.monitor.sample(after(open(), 60)).await;
    assert_eq!(score.components.freshness.credit, 1.0);

    // Past the 300s staleness threshold with no newer cycle
    let score = h.monitor.sample(after(open(), 420)).await;
    assert_eq!(score.components.freshness.credit, 0.0);
    assert_eq!(score.components.running_state.credit, 1.0);
    assert!(h
        .alerts
        .alerts()
        .iter()
        .any(|a| a.code == AlertCode::DataStale && a.severity == AlertSeverity::Warning));
}

#[tokio::test]
async fn source_outage_lowers_error_rate_credit() {
    let h = harness(SchedulerConfig::default());
    assert_eq!(h.scheduler.on_tick(open()).await, SchedulerState::Running);
    let healthy = h.monitor.sample(after(open(), 10)).await;
    assert_eq!(healthy.components.error_rate.credit, 1.0);

    h.source.set_unavailable(true);
    for i in 1..=3 {
        h.scheduler.on_tick(after(open(), i * 60)).await;
    }
    assert_eq!(h.scheduler.runner().counters().cycles_failed, 3);

    let score = h.monitor.sample(after(open(), 200)).await;
    assert_eq!(score.components.error_rate.credit, 0.0);
}

#[tokio::test]
async fn session_close_stops_running_scheduler_until_next_open() {
    let h = harness(SchedulerConfig::default());

    assert_eq!(h.scheduler.on_tick(open()).await, SchedulerState::Running);
    assert_eq!(h.scheduler.runner().counters().cycles_run, 1);
    let calls = h.source.call_count();

    assert_eq!(h.scheduler.on_tick(closed()).await, SchedulerState::Stopped);
    let tail: Vec<(SchedulerState, TransitionReason)> = h
        .scheduler
        .transitions()
        .iter()
        .rev()
        .take(2)
        .map(|t| (t.to, t.reason))
        .collect();
    assert_eq!(
        tail,
        vec![
            (SchedulerState::Stopped, TransitionReason::SessionClosed),
            (SchedulerState::Stopping, TransitionReason::SessionClosed),
        ]
    );

    for i in 1..=3 {
        h.scheduler.on_tick(after(closed(), i * 60)).await;
    }
    assert_eq!(h.scheduler.runner().counters().cycles_run, 1);
    assert_eq!(h.source.call_count(), calls);
    assert!(h.scheduler.status().active_since.is_none());

    // Stopped while closed is the expected state
    let score = h.monitor.sample(after(closed(), 300)).await;
    assert_eq!(score.components.running_state.credit, 1.0);

    // Thursday 10:00 New York
    let next_open: DateTime<Utc> = "2024-03-14T14:00:00Z".parse().unwrap();
    assert_eq!(h.scheduler.on_tick(next_open).await, SchedulerState::Running);
    assert_eq!(h.scheduler.runner().counters().cycles_run, 2);
}

#[tokio::test]
async fn repeated_source_outage_fails_then_auto_restarts_after_backoff() {
    let h = harness(SchedulerConfig {
        restart_backoff_secs: 30,
        ..SchedulerConfig::default()
    });
    h.source.set_unavailable(true);

    assert_eq!(h.scheduler.on_tick(open()).await, SchedulerState::Running);
    assert_eq!(h.scheduler.on_tick(after(open(), 60)).await, SchedulerState::Running);
    assert_eq!(
        h.scheduler.on_tick(after(open(), 120)).await,
        SchedulerState::Failed
    );

    let status = h.scheduler.status();
    assert_eq!(status.last_transition_reason, TransitionReason::RunnerDegraded);
    assert!(status.last_error.unwrap().contains("3 consecutive"));
    assert!(!h.scheduler.runner().is_running());
    assert_eq!(
        h.scheduler.next_restart_at().await,
        Some(after(open(), 150))
    );

    h.monitor.sample(after(open(), 125)).await;
    assert!(h
        .alerts
        .alerts()
        .iter()
        .any(|a| a.code == AlertCode::SchedulerFailed && a.severity == AlertSeverity::Critical));

    // Backoff not yet elapsed
    assert_eq!(
        h.scheduler.on_tick(after(open(), 140)).await,
        SchedulerState::Failed
    );

    h.source.set_unavailable(false);
    assert_eq!(
        h.scheduler.on_tick(after(open(), 150)).await,
        SchedulerState::Running
    );
    let status = h.scheduler.status();
    assert_eq!(status.last_transition_reason, TransitionReason::AutoRestart);
    assert_eq!(status.auto_restarts, 1);
    assert_eq!(h.scheduler.runner().counters().cycles_run, 4);
    assert!(!h.scheduler.runner().is_degraded());

    h.alerts.clear();
    h.monitor.sample(after(open(), 160)).await;
    assert!(h
        .alerts
        .alerts()
        .iter()
        .any(|a| a.code == AlertCode::SchedulerFailed && a.severity == AlertSeverity::Resolved));
}

#[tokio::test]
async fn auto_restarts_are_capped_per_session() {
    let h = harness(SchedulerConfig {
        max_auto_restarts: 1,
        restart_backoff_secs: 10,
        max_restart_backoff_secs: 100,
        ..SchedulerConfig::default()
    });
    h.source.set_unavailable(true);

    let mut t = 0;
    let mut tick = |secs: i64| {
        t += secs;
        after(open(), t)
    };

    for _ in 0..3 {
        h.scheduler.on_tick(tick(60)).await;
    }
    assert_eq!(h.scheduler.state(), SchedulerState::Failed);

    // First auto-restart, which degrades again after three more cycles
    assert_eq!(h.scheduler.on_tick(tick(10)).await, SchedulerState::Running);
    h.scheduler.on_tick(tick(60)).await;
    assert_eq!(h.scheduler.on_tick(tick(60)).await, SchedulerState::Failed);

    // Budget exhausted: stays FAILED however long we wait
    for _ in 0..3 {
        assert_eq!(h.scheduler.on_tick(tick(300)).await, SchedulerState::Failed);
    }
    assert_eq!(h.scheduler.status().auto_restarts, 1);

    // Manual restart resets the budget
    h.source.set_unavailable(false);
    let status = h.scheduler.restart().await.unwrap();
    assert_eq!(status.state, SchedulerState::Running);
    assert_eq!(status.auto_restarts, 0);
}
