use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::datasource::{
    FetchBatch, MarketDataSink, MarketDataSource, SinkError, SourceError, WriteOutcome,
};
use crate::health::{AlertDeliveryError, AlertSink};
use crate::models::{Alert, OhlcvBar, Symbol, Timeframe};

/// Per-symbol behaviour of `ScriptedSource`
#[derive(Debug, Clone)]
pub enum SymbolScript {
    /// Every fetch reports an error for the symbol
    AlwaysFail(String),
    /// The first `n` fetches fail, then succeed
    FailTimes(u32),
    /// The fetch never returns
    Hang,
    /// Fetch succeeds with no bars
    Empty,
}

/// Market data source driven by per-symbol scripts
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, SymbolScript>>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    unavailable: AtomicBool,
    panic_on_fetch: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    base_time: DateTime<Utc>,
    sequence: AtomicU32,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            unavailable: AtomicBool::new(false),
            panic_on_fetch: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            base_time: Utc::now() - ChronoDuration::days(1),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn script(&self, symbol: &str, script: SymbolScript) {
        self.scripts.lock().insert(symbol.to_string(), script);
    }

    pub fn clear_scripts(&self) {
        self.scripts.lock().clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_panic(&self, panic: bool) {
        self.panic_on_fetch.store(panic, Ordering::SeqCst);
    }

    /// Symbol ids in the order their fetches started
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn bar(&self, symbol: &str) -> OhlcvBar {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) as i64;
        OhlcvBar {
            symbol: symbol.to_string(),
            timeframe: Timeframe::OneMinute,
            open_time: self.base_time + ChronoDuration::minutes(n),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(1000),
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    async fn fetch(&self, symbols: &[Symbol]) -> Result<FetchBatch, SourceError> {
        if self.panic_on_fetch.load(Ordering::SeqCst) {
            panic!("scripted source panic");
        }

        {
            let mut calls = self.calls.lock();
            calls.extend(symbols.iter().map(|s| s.id.clone()));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("scripted outage".to_string()));
        }

        let mut batch = FetchBatch::default();
        for symbol in symbols {
            let attempt = {
                let mut attempts = self.attempts.lock();
                let n = attempts.entry(symbol.id.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let script = self.scripts.lock().get(&symbol.id).cloned();
            match script {
                Some(SymbolScript::AlwaysFail(msg)) => {
                    batch.errors.insert(symbol.id.clone(), msg);
                }
                Some(SymbolScript::FailTimes(n)) if attempt <= n => {
                    batch
                        .errors
                        .insert(symbol.id.clone(), format!("scripted failure {}", attempt));
                }
                Some(SymbolScript::Hang) => {
                    std::future::pending::<()>().await;
                }
                Some(SymbolScript::Empty) => {}
                _ => {
                    batch.bars.insert(symbol.id.clone(), vec![self.bar(&symbol.id)]);
                }
            }
        }
        Ok(batch)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Sink that records writes and fails on demand
pub struct RecordingSink {
    writes: Mutex<Vec<(String, usize)>>,
    failing: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    recompute: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
            recompute: AtomicBool::new(false),
        }
    }

    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().insert(symbol.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_recompute(&self, recompute: bool) {
        self.recompute.store(recompute, Ordering::SeqCst);
    }

    /// `(symbol, bar count)` per accepted write
    pub fn writes(&self) -> Vec<(String, usize)> {
        self.writes.lock().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSink for RecordingSink {
    async fn write(&self, symbol: &Symbol, bars: &[OhlcvBar]) -> Result<WriteOutcome, SinkError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("scripted store outage".to_string()));
        }
        if self.failing.lock().contains(&symbol.id) {
            return Err(SinkError::Write(format!("scripted write error for {}", symbol.id)));
        }
        self.writes.lock().push((symbol.id.clone(), bars.len()));
        Ok(WriteOutcome {
            rows_written: bars.len(),
            recompute_needed: self.recompute.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Alert sink that keeps every delivered alert
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    failing: AtomicBool,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl Default for RecordingAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertDeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AlertDeliveryError::Rejected("scripted delivery failure".to_string()));
        }
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
