use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::errors::{CycleError, SymbolError};
use super::retry::RetryPolicy;
use crate::config::PipelineConfig;
use crate::datasource::{MarketDataSink, MarketDataSource, SinkError, SourceError};
use crate::models::{
    CycleResult, CycleStatus, PriorityTier, Symbol, SymbolCatalog, SyncStateTable,
};

/// Knobs of a single update cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub concurrency_limit: usize,
    pub fetch_timeout: Duration,
    pub write_timeout: Duration,
    pub cycle_timeout: Duration,
    pub retry: RetryPolicy,
    pub demotion_threshold: u32,
    /// 0 disables systemic failure detection
    pub systemic_failure_window: usize,
}

impl From<&PipelineConfig> for CycleSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit.max(1),
            fetch_timeout: config.fetch_timeout(),
            write_timeout: config.write_timeout(),
            cycle_timeout: config.cycle_timeout(),
            retry: RetryPolicy::from(&config.retry),
            demotion_threshold: config.demotion_threshold,
            systemic_failure_window: config.systemic_failure_window,
        }
    }
}

/// Successful cycle run plus per-symbol timings
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub result: CycleResult,
    pub symbol_latencies: Vec<Duration>,
}

/// Cycle that ended on a cycle-fatal error
///
/// `report` still carries the partial counts; symbols never attempted are
/// counted as skipped.
#[derive(Debug, Clone)]
pub struct CycleAborted {
    pub error: CycleError,
    pub report: CycleReport,
}

#[derive(Debug)]
enum SymbolOutcome {
    Synced { rows: usize, recompute: bool },
    Failed(SymbolError),
    /// Abandoned on cancellation
    Skipped,
    Fatal(CycleError),
}

enum AttemptError {
    Transient(SymbolError),
    Fatal(CycleError),
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    recompute: usize,
    bars_written: usize,
    completed: usize,
    window_failures: usize,
}

/// One bounded fetch-and-persist pass over the catalog
pub struct UpdateCycle {
    source: Arc<dyn MarketDataSource>,
    sink: Arc<dyn MarketDataSink>,
    settings: CycleSettings,
}

impl UpdateCycle {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn MarketDataSink>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            source,
            sink,
            settings,
        }
    }

    /// Split the catalog into CRITICAL, STANDARD, LOW batches by effective
    /// tier, keeping catalog order inside each batch
    pub fn partition(
        catalog: &SymbolCatalog,
        states: &SyncStateTable,
    ) -> Vec<(PriorityTier, Vec<Symbol>)> {
        PriorityTier::ALL
            .iter()
            .map(|tier| {
                let batch = catalog
                    .iter()
                    .filter(|s| states.effective_tier(s) == *tier)
                    .cloned()
                    .collect();
                (*tier, batch)
            })
            .collect()
    }

    /// Run one cycle starting at `started_at`, applying outcomes to `states`
    ///
    /// `states` is the caller's working copy; it is updated in place even
    /// when the cycle aborts, so completed symbols keep their outcome.
    /// Outcome timestamps are `started_at` plus the elapsed cycle time.
    pub async fn run(
        &self,
        cycle_id: u64,
        catalog: &SymbolCatalog,
        states: &mut SyncStateTable,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleAborted> {
        self.run_inner(cycle_id, catalog, states, started_at, cancel)
            .instrument(info_span!("update_cycle", cycle_id))
            .await
    }

    async fn run_inner(
        &self,
        cycle_id: u64,
        catalog: &SymbolCatalog,
        states: &mut SyncStateTable,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleAborted> {
        let clock = Instant::now();
        let elapsed_since_start = || {
            let elapsed = chrono::Duration::from_std(clock.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());
            started_at + elapsed
        };
        let deadline = tokio::time::Instant::now() + self.settings.cycle_timeout;

        let batches = Self::partition(catalog, states);
        let mut tally = Tally::default();
        let mut latencies = Vec::with_capacity(catalog.len());
        let mut status = CycleStatus::Completed;
        let mut fatal: Option<CycleError> = None;

        for (tier, batch) in &batches {
            if batch.is_empty() {
                continue;
            }
            if status != CycleStatus::Completed || fatal.is_some() {
                tally.skipped += batch.len();
                continue;
            }
            if cancel.is_cancelled() {
                status = CycleStatus::Cancelled;
                tally.skipped += batch.len();
                continue;
            }

            debug!("Syncing {} batch of {} symbols", tier, batch.len());
            let mut pending = batch.len();
            let jobs: Vec<_> = batch.iter().map(|s| self.sync_symbol(s, cancel)).collect();
            let mut workers = stream::iter(jobs)
                .buffer_unordered(self.settings.concurrency_limit);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        status = CycleStatus::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        status = CycleStatus::TimedOut;
                        break;
                    }
                    next = workers.next() => next,
                };
                let Some((symbol, outcome, elapsed)) = next else {
                    break;
                };
                pending -= 1;
                latencies.push(elapsed);

                let now = elapsed_since_start();
                match outcome {
                    SymbolOutcome::Synced { rows, recompute } => {
                        debug!("{} synced ({} rows)", symbol.id, rows);
                        states.entry(symbol).record_success(now, rows);
                        tally.succeeded += 1;
                        tally.bars_written += rows;
                        if recompute {
                            tally.recompute += 1;
                        }
                        tally.completed += 1;
                    }
                    SymbolOutcome::Failed(err) => {
                        debug!("{} failed: {}", symbol.id, err);
                        let demoted = states.entry(symbol).record_failure(
                            now,
                            err.to_string(),
                            self.settings.demotion_threshold,
                        );
                        if demoted {
                            warn!(
                                "⬇️  {} demoted to {} after repeated failures",
                                symbol.id,
                                symbol.tier.demoted()
                            );
                        }
                        tally.failed += 1;
                        tally.completed += 1;
                        tally.window_failures += usize::from(
                            tally.completed <= self.settings.systemic_failure_window,
                        );

                        let window = self.settings.systemic_failure_window;
                        if window > 0
                            && tally.completed == window
                            && tally.window_failures == window
                        {
                            fatal = Some(CycleError::SystemicFailure {
                                window,
                                last_error: err.to_string(),
                            });
                            break;
                        }
                    }
                    SymbolOutcome::Skipped => {
                        tally.skipped += 1;
                    }
                    SymbolOutcome::Fatal(err) => {
                        tally.skipped += 1;
                        fatal = Some(err);
                        break;
                    }
                }
            }
            // In-flight and unstarted symbols of this batch are abandoned
            tally.skipped += pending;
        }

        if fatal.is_some() {
            status = CycleStatus::Aborted;
        }

        let result = CycleResult {
            cycle_id,
            started_at,
            finished_at: elapsed_since_start(),
            attempted: catalog.len(),
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            recompute_requested: tally.recompute,
            bars_written: tally.bars_written,
            duration_ms: clock.elapsed().as_millis() as u64,
            status,
            error: fatal.as_ref().map(|e| e.to_string()).or_else(|| match status {
                CycleStatus::TimedOut => Some(format!(
                    "cycle exceeded {:?}",
                    self.settings.cycle_timeout
                )),
                CycleStatus::Cancelled => Some("cycle cancelled".to_string()),
                _ => None,
            }),
        };

        info!(
            "Cycle {} {:?}: {}/{} ok, {} failed, {} skipped in {}ms",
            cycle_id,
            result.status,
            result.succeeded,
            result.attempted,
            result.failed,
            result.skipped,
            result.duration_ms
        );

        let report = CycleReport {
            result,
            symbol_latencies: latencies,
        };
        match fatal {
            Some(error) => {
                warn!("Cycle {} aborted: {}", cycle_id, error);
                Err(CycleAborted { error, report })
            }
            None => Ok(report),
        }
    }

    /// Fetch and persist one symbol, retrying transient errors
    async fn sync_symbol<'a>(
        &self,
        symbol: &'a Symbol,
        cancel: &CancellationToken,
    ) -> (&'a Symbol, SymbolOutcome, Duration) {
        let started = Instant::now();
        let mut retry = 0u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break SymbolOutcome::Skipped;
            }
            match self.attempt(symbol).await {
                Ok((rows, recompute)) => break SymbolOutcome::Synced { rows, recompute },
                Err(AttemptError::Fatal(err)) => break SymbolOutcome::Fatal(err),
                Err(AttemptError::Transient(err)) => {
                    if retry >= self.settings.retry.max_retries {
                        break SymbolOutcome::Failed(err);
                    }
                    let delay = self.settings.retry.delay_for(retry);
                    retry += 1;
                    debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        symbol.id, retry, err, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break SymbolOutcome::Skipped,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        (symbol, outcome, started.elapsed())
    }

    /// One fetch + write; a retry repeats both
    async fn attempt(&self, symbol: &Symbol) -> Result<(usize, bool), AttemptError> {
        let fetch = tokio::time::timeout(
            self.settings.fetch_timeout,
            self.source.fetch(std::slice::from_ref(symbol)),
        )
        .await;

        let mut batch = match fetch {
            Err(_) => {
                return Err(AttemptError::Transient(SymbolError::FetchTimeout(
                    self.settings.fetch_timeout,
                )))
            }
            Ok(Err(SourceError::Unavailable(msg))) => {
                return Err(AttemptError::Fatal(CycleError::SourceUnavailable(msg)))
            }
            Ok(Ok(batch)) => batch,
        };

        if let Some(err) = batch.errors.remove(&symbol.id) {
            return Err(AttemptError::Transient(SymbolError::Fetch(err)));
        }

        let bars = batch.bars.remove(&symbol.id).unwrap_or_default();
        if bars.is_empty() {
            return Ok((0, false));
        }

        let write =
            tokio::time::timeout(self.settings.write_timeout, self.sink.write(symbol, &bars)).await;
        match write {
            Err(_) => Err(AttemptError::Transient(SymbolError::WriteTimeout(
                self.settings.write_timeout,
            ))),
            Ok(Err(SinkError::Unavailable(msg))) => {
                Err(AttemptError::Fatal(CycleError::SinkUnavailable(msg)))
            }
            Ok(Err(SinkError::Write(msg))) => Err(AttemptError::Transient(SymbolError::Write(msg))),
            Ok(Ok(outcome)) => Ok((outcome.rows_written, outcome.recompute_needed)),
        }
    }
}
