use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::errors::PipelineError;
use super::update_cycle::{CycleAborted, CycleReport, CycleSettings, UpdateCycle};
use crate::config::PipelineConfig;
use crate::datasource::{MarketDataSink, MarketDataSource};
use crate::metrics::{CycleLatencyTracker, LatencyStats};
use crate::models::{
    CycleHistory, CycleResult, PipelineCounters, SymbolCatalog, SymbolSyncState, SyncStateTable,
};

/// State shared between the cycle writer and readers, replaced as a whole per cycle
struct RunnerShared {
    states: SyncStateTable,
    counters: PipelineCounters,
    history: CycleHistory,
    degraded: bool,
    consecutive_fatal: u32,
    last_error: Option<String>,
    next_cycle_id: u64,
}

/// Consistent point-in-time view of the runner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunnerSnapshot {
    pub running: bool,
    pub degraded: bool,
    pub consecutive_fatal: u32,
    pub last_error: Option<String>,
    pub counters: PipelineCounters,
    /// Newest first
    pub recent_cycles: Vec<CycleResult>,
    pub sync_states: Vec<SymbolSyncState>,
}

/// Inputs the health monitor scores on, read under one lock
#[derive(Debug, Clone)]
pub struct RunnerHealthView {
    pub running: bool,
    pub degraded: bool,
    pub cycles_run: u64,
    pub recent_error_rate: f64,
    pub recent_mean_duration_ms: Option<u64>,
    pub sync_states: Vec<SymbolSyncState>,
}

impl RunnerHealthView {
    /// Time since the most recent success of any symbol
    pub fn freshest_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.sync_states
            .iter()
            .filter_map(|s| s.last_success_at)
            .max()
            .map(|t| now - t)
    }
}

/// Repeatedly executes update cycles; owns sync states, counters and history
///
/// Features:
/// - One cycle at a time: `tick` holds the cycle gate for the whole cycle
/// - Readers never see a half-applied cycle: outcomes land on a working copy
///   that is committed under a single write lock
/// - Graceful stop: an in-flight cycle gets `shutdown_grace` to finish, then is cancelled
///
/// `running` only flips while the `shared` write lock is held, so views taken
/// under the read lock never pair a stale flag with fresh state.
pub struct PipelineRunner {
    catalog: Arc<SymbolCatalog>,
    cycle: UpdateCycle,
    config: PipelineConfig,
    shared: RwLock<RunnerShared>,
    latency: Mutex<CycleLatencyTracker>,
    cycle_gate: tokio::sync::Mutex<()>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl PipelineRunner {
    pub fn new(
        catalog: Arc<SymbolCatalog>,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn MarketDataSink>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let latency =
            CycleLatencyTracker::new().map_err(|e| PipelineError::Metrics(e.to_string()))?;
        let cycle = UpdateCycle::new(source, sink, CycleSettings::from(&config));

        let shared = RunnerShared {
            states: SyncStateTable::from_catalog(&catalog),
            counters: PipelineCounters::default(),
            history: CycleHistory::new(config.history_capacity),
            degraded: false,
            consecutive_fatal: 0,
            last_error: None,
            next_cycle_id: 1,
        };

        let token = CancellationToken::new();
        token.cancel();

        Ok(Self {
            catalog,
            cycle,
            config,
            shared: RwLock::new(shared),
            latency: Mutex::new(latency),
            cycle_gate: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(token),
        })
    }

    pub fn catalog(&self) -> &SymbolCatalog {
        &self.catalog
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.read().degraded
    }

    /// Arm the runner; clears the degraded flag. No-op when already running.
    pub fn start(&self) {
        if self.running.load(Ordering::SeqCst) {
            debug!("Pipeline runner already running");
            return;
        }

        *self.cancel.lock() = CancellationToken::new();
        {
            let mut shared = self.shared.write();
            shared.degraded = false;
            shared.consecutive_fatal = 0;
            self.running.store(true, Ordering::SeqCst);
        }
        info!("▶️  Pipeline runner started ({} symbols)", self.catalog.len());
    }

    /// Disarm the runner
    ///
    /// An in-flight cycle may finish within `shutdown_grace`; after that it is
    /// cancelled and given `abandon_timeout` to unwind.
    pub async fn stop(&self) {
        let was_running = {
            let _shared = self.shared.write();
            self.running.swap(false, Ordering::SeqCst)
        };
        if !was_running {
            debug!("Pipeline runner already stopped");
            return;
        }

        let token = self.cancel.lock().clone();
        match tokio::time::timeout(self.config.shutdown_grace(), self.cycle_gate.lock()).await {
            Ok(_gate) => {
                token.cancel();
            }
            Err(_) => {
                warn!(
                    "In-flight cycle exceeded {:?} grace period, cancelling",
                    self.config.shutdown_grace()
                );
                token.cancel();
                if tokio::time::timeout(self.config.abandon_timeout(), self.cycle_gate.lock())
                    .await
                    .is_err()
                {
                    error!("Cancelled cycle did not unwind in time");
                }
            }
        }
        info!("⏹️  Pipeline runner stopped");
    }

    /// Run one update cycle starting at `now`
    ///
    /// Cycle-fatal errors are returned after the cycle is recorded; the
    /// degraded flag is set after `degraded_after` of them in a row.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<CycleResult, PipelineError> {
        if !self.is_running() {
            return Err(PipelineError::NotRunning);
        }
        let _gate = self.cycle_gate.lock().await;
        // Stopped while waiting for the gate
        if !self.is_running() {
            return Err(PipelineError::NotRunning);
        }

        let token = self.cancel.lock().clone();
        let (cycle_id, mut working) = {
            let mut shared = self.shared.write();
            let id = shared.next_cycle_id;
            shared.next_cycle_id += 1;
            (id, shared.states.clone())
        };

        let outcome = self
            .cycle
            .run(cycle_id, &self.catalog, &mut working, now, &token)
            .await;

        let (report, fatal) = match outcome {
            Ok(report) => (report, None),
            Err(CycleAborted { error, report }) => (report, Some(error)),
        };
        self.record_latency(&report);

        let result = report.result;
        {
            let mut shared = self.shared.write();
            shared.states = working;
            shared.counters.record(&result, fatal.is_some());
            shared.history.push(result.clone());

            match &fatal {
                Some(err) => {
                    shared.consecutive_fatal += 1;
                    shared.last_error = Some(err.to_string());
                    if shared.consecutive_fatal >= self.config.degraded_after && !shared.degraded
                    {
                        shared.degraded = true;
                        error!(
                            "🚨 Pipeline degraded after {} consecutive cycle failures",
                            shared.consecutive_fatal
                        );
                    }
                }
                None => shared.consecutive_fatal = 0,
            }
        }

        match fatal {
            Some(source) => Err(PipelineError::Cycle { cycle_id, source }),
            None => Ok(result),
        }
    }

    fn record_latency(&self, report: &CycleReport) {
        let mut latency = self.latency.lock();
        latency.record_cycle(Duration::from_millis(report.result.duration_ms));
        for elapsed in &report.symbol_latencies {
            latency.record_symbol(*elapsed);
        }
    }

    pub fn snapshot(&self, recent: usize) -> RunnerSnapshot {
        let shared = self.shared.read();
        RunnerSnapshot {
            running: self.running.load(Ordering::SeqCst),
            degraded: shared.degraded,
            consecutive_fatal: shared.consecutive_fatal,
            last_error: shared.last_error.clone(),
            counters: shared.counters,
            recent_cycles: shared.history.recent(recent),
            sync_states: shared.states.sorted(),
        }
    }

    pub fn health_view(&self, error_window: usize, performance_window: usize) -> RunnerHealthView {
        let shared = self.shared.read();
        RunnerHealthView {
            running: self.running.load(Ordering::SeqCst),
            degraded: shared.degraded,
            cycles_run: shared.counters.cycles_run,
            recent_error_rate: shared.history.recent_error_rate(error_window),
            recent_mean_duration_ms: shared.history.recent_mean_duration_ms(performance_window),
            sync_states: shared.states.sorted(),
        }
    }

    pub fn counters(&self) -> PipelineCounters {
        self.shared.read().counters
    }

    pub fn last_cycle(&self) -> Option<CycleResult> {
        self.shared.read().history.last().cloned()
    }

    pub fn recent_cycles(&self, n: usize) -> Vec<CycleResult> {
        self.shared.read().history.recent(n)
    }

    pub fn sync_states(&self) -> Vec<SymbolSyncState> {
        self.shared.read().states.sorted()
    }

    pub fn latency_stats(&self) -> Vec<LatencyStats> {
        self.latency.lock().all_stats()
    }
}
