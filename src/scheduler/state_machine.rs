use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::errors::SchedulerError;
use crate::calendar::{MarketCalendar, SessionPhase};
use crate::config::SchedulerConfig;
use crate::models::{SchedulerState, SchedulerStatus, TransitionReason, TransitionRecord};
use crate::pipeline::{PipelineError, PipelineRunner, RunnerHealthView};

/// Transitions kept for `/status` and diagnostics
const TRANSITION_LOG_CAPACITY: usize = 32;

/// Session bookkeeping, only touched while holding the transition lock
#[derive(Debug, Default)]
struct Lifecycle {
    last_phase: Option<SessionPhase>,
    next_restart_at: Option<DateTime<Utc>>,
}

/// Lifecycle state machine around the pipeline runner
///
/// All transitions run under one async mutex, so they are linearized and at
/// most one is in flight. `status()` never takes that mutex.
pub struct Scheduler {
    runner: Arc<PipelineRunner>,
    calendar: Arc<MarketCalendar>,
    config: SchedulerConfig,
    tick_interval: Duration,
    status: RwLock<SchedulerStatus>,
    transitions: RwLock<VecDeque<TransitionRecord>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    wake: Notify,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        runner: Arc<PipelineRunner>,
        calendar: Arc<MarketCalendar>,
        config: SchedulerConfig,
        tick_interval: Duration,
    ) -> Self {
        Self {
            runner,
            calendar,
            config,
            tick_interval,
            status: RwLock::new(SchedulerStatus::initial(Utc::now())),
            transitions: RwLock::new(VecDeque::with_capacity(TRANSITION_LOG_CAPACITY)),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Non-blocking status read
    pub fn status(&self) -> SchedulerStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.status.read().state
    }

    /// Recent transitions, oldest first
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.transitions.read().iter().cloned().collect()
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.runner
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Scheduler state and runner view read together, for health scoring
    pub fn health_inputs(
        &self,
        error_window: usize,
        performance_window: usize,
    ) -> (SchedulerState, RunnerHealthView) {
        let status = self.status.read();
        let view = self.runner.health_view(error_window, performance_window);
        (status.state, view)
    }

    /// Earliest time the next auto-restart may happen, if one is pending
    pub async fn next_restart_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().await.next_restart_at
    }

    // ------------------------------------------------------------------
    // Control operations (idempotent)
    // ------------------------------------------------------------------

    /// Start the scheduler; from FAILED this behaves as `restart()`
    pub async fn start(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            SchedulerState::Running | SchedulerState::Starting => {
                debug!("Scheduler already running, start ignored");
                return Ok(self.status());
            }
            SchedulerState::Failed => {
                self.restart_locked(&mut lifecycle, TransitionReason::ManualStart)
                    .await?
            }
            SchedulerState::Stopped | SchedulerState::Stopping => {
                self.start_locked(TransitionReason::ManualStart)?
            }
        }
        self.wake.notify_one();
        Ok(self.status())
    }

    pub async fn stop(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(TransitionReason::ManualStop).await?;
        lifecycle.next_restart_at = None;
        Ok(self.status())
    }

    /// Stop if needed, then start; resets the auto-restart budget
    pub async fn restart(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.restart_locked(&mut lifecycle, TransitionReason::ManualRestart)
            .await?;
        self.wake.notify_one();
        Ok(self.status())
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// One driver step at `now`: calendar gating, auto-restart, then a runner
    /// tick when RUNNING. Never fails; internal errors move to FAILED.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> SchedulerState {
        let phase = self.calendar.session_phase(now);
        let mut lifecycle = self.lifecycle.lock().await;

        let previous = lifecycle.last_phase.replace(phase);
        {
            let mut status = self.status.write();
            status.session_phase = Some(phase);
            status.next_open = if phase.is_open() {
                None
            } else {
                self.calendar.next_open_after(now)
            };
        }
        if previous != Some(phase) {
            debug!("Session phase {:?} -> {}", previous, phase);
            if let Err(e) = self.on_phase_change(&mut lifecycle, previous, phase).await {
                self.fail(&mut lifecycle, TransitionReason::InternalError, e.to_string(), now);
            }
        }

        if self.state() == SchedulerState::Failed && phase.is_open() {
            self.maybe_auto_restart(&mut lifecycle, now);
        }

        if self.state() != SchedulerState::Running {
            return self.state();
        }
        // Control calls may proceed while the cycle runs
        drop(lifecycle);

        let runner = self.runner.clone();
        let outcome = tokio::spawn(async move { runner.tick(now).await }).await;

        let mut lifecycle = self.lifecycle.lock().await;
        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    "Cycle {} finished: {}/{} ok",
                    result.cycle_id, result.succeeded, result.attempted
                );
            }
            Ok(Err(PipelineError::NotRunning)) => {
                debug!("Runner stopped before the cycle started");
            }
            Ok(Err(e)) => {
                warn!("Cycle failed: {}", e);
            }
            Err(join_error) => {
                error!("❌ Cycle task crashed: {}", join_error);
                self.fail(
                    &mut lifecycle,
                    TransitionReason::InternalError,
                    SchedulerError::Internal(format!("cycle task crashed: {}", join_error))
                        .to_string(),
                    now,
                );
                self.runner.stop().await;
                return self.state();
            }
        }

        if self.state() == SchedulerState::Running && self.runner.is_degraded() {
            let err = SchedulerError::RunnerDegraded {
                consecutive_failures: self.runner.snapshot(0).consecutive_fatal,
            };
            self.fail(
                &mut lifecycle,
                TransitionReason::RunnerDegraded,
                err.to_string(),
                now,
            );
            self.runner.stop().await;
        }

        self.state()
    }

    /// Spawn the single long-lived driver loop
    pub fn spawn_driver(self: &Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            info!(
                "🕐 Scheduler driver started (interval {:?})",
                scheduler.tick_interval
            );
            loop {
                scheduler.on_tick(Utc::now()).await;

                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = scheduler.wake.notified() => {}
                    _ = tokio::time::sleep(scheduler.tick_interval) => {}
                }
            }
            info!("Scheduler driver stopped");
        });

        if let Some(previous) = self.driver.lock().replace(handle) {
            warn!("Replacing an existing scheduler driver");
            previous.abort();
        }
    }

    /// Stop the driver and the runner for process exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if let Err(e) = self.stop_locked(TransitionReason::Shutdown).await {
                error!("Scheduler shutdown failed: {}", e);
            }
            lifecycle.next_restart_at = None;
        }

        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler driver ended abnormally: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions (caller holds the lifecycle lock)
    // ------------------------------------------------------------------

    fn transition(
        &self,
        to: SchedulerState,
        reason: TransitionReason,
    ) -> Result<(), SchedulerError> {
        let record = {
            let mut status = self.status.write();
            let from = status.state;
            if !from.can_transition_to(to) {
                return Err(SchedulerError::InvalidTransition { from, to });
            }
            let at = Utc::now();
            status.state = to;
            status.since = at;
            status.last_transition_reason = reason;
            match to {
                SchedulerState::Running => status.active_since = Some(at),
                SchedulerState::Stopped => status.active_since = None,
                _ => {}
            }
            TransitionRecord {
                from,
                to,
                reason,
                at,
            }
        };

        info!(
            "🔄 Scheduler {} -> {} ({:?})",
            record.from, record.to, record.reason
        );
        let mut log = self.transitions.write();
        if log.len() >= TRANSITION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(record);
        Ok(())
    }

    fn start_locked(&self, reason: TransitionReason) -> Result<(), SchedulerError> {
        self.transition(SchedulerState::Starting, reason)?;
        self.runner.start();
        self.transition(SchedulerState::Running, reason)
    }

    async fn stop_locked(&self, reason: TransitionReason) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Stopped => {
                debug!("Scheduler already stopped");
                return Ok(());
            }
            SchedulerState::Running | SchedulerState::Failed => {}
            from => {
                return Err(SchedulerError::InvalidTransition {
                    from,
                    to: SchedulerState::Stopping,
                })
            }
        }
        self.transition(SchedulerState::Stopping, reason)?;
        self.runner.stop().await;
        self.transition(SchedulerState::Stopped, reason)
    }

    async fn restart_locked(
        &self,
        lifecycle: &mut Lifecycle,
        reason: TransitionReason,
    ) -> Result<(), SchedulerError> {
        self.stop_locked(reason).await?;
        self.status.write().auto_restarts = 0;
        lifecycle.next_restart_at = None;
        self.start_locked(reason)
    }

    /// Enter FAILED and schedule the next auto-restart
    fn fail(
        &self,
        lifecycle: &mut Lifecycle,
        reason: TransitionReason,
        error: String,
        now: DateTime<Utc>,
    ) {
        error!("🚨 Scheduler failed: {}", error);
        let attempts = {
            let mut status = self.status.write();
            status.last_error = Some(error);
            status.auto_restarts
        };
        if let Err(e) = self.transition(SchedulerState::Failed, reason) {
            error!("Could not enter FAILED: {}", e);
        }
        lifecycle.next_restart_at = Some(now + self.restart_backoff(attempts));
    }

    /// `restart_backoff_secs * 2^attempts`, capped
    fn restart_backoff(&self, attempts: u32) -> chrono::Duration {
        let secs = self
            .config
            .restart_backoff_secs
            .saturating_mul(1u64 << attempts.min(20))
            .min(self.config.max_restart_backoff_secs);
        chrono::Duration::seconds(secs as i64)
    }

    fn maybe_auto_restart(&self, lifecycle: &mut Lifecycle, now: DateTime<Utc>) {
        let used = self.status.read().auto_restarts;
        if used >= self.config.max_auto_restarts {
            debug!("Auto-restart budget exhausted, manual restart required");
            return;
        }
        match lifecycle.next_restart_at {
            Some(at) if now >= at => {}
            _ => return,
        }

        self.status.write().auto_restarts = used + 1;
        lifecycle.next_restart_at = None;
        info!(
            "🔁 Auto-restart {}/{}",
            used + 1,
            self.config.max_auto_restarts
        );
        if let Err(e) = self.start_locked(TransitionReason::AutoRestart) {
            self.fail(lifecycle, TransitionReason::InternalError, e.to_string(), now);
        }
    }

    async fn on_phase_change(
        &self,
        lifecycle: &mut Lifecycle,
        previous: Option<SessionPhase>,
        phase: SessionPhase,
    ) -> Result<(), SchedulerError> {
        if phase.is_open() {
            self.status.write().auto_restarts = 0;
            if self.config.auto_start && self.state() == SchedulerState::Stopped {
                info!("🔔 Session open, auto-starting");
                self.start_locked(TransitionReason::SessionOpened)?;
            }
            return Ok(());
        }

        // CLOSED always stops, even a run started outside the session
        let left_open = previous.map_or(true, |p| p.is_open());
        if (left_open || phase == SessionPhase::Closed)
            && matches!(
                self.state(),
                SchedulerState::Running | SchedulerState::Failed
            )
        {
            info!("🔕 Session {}, auto-stopping", phase);
            self.stop_locked(TransitionReason::SessionClosed).await?;
            lifecycle.next_restart_at = None;
        }
        Ok(())
    }
}
