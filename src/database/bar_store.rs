use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

use crate::datasource::{MarketDataSink, SinkError, WriteOutcome};
use crate::models::{OhlcvBar, Symbol};

/// Statistics for the bar store
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BarStoreStats {
    pub symbols: usize,
    pub stored_bars: usize,
    pub max_bars_per_symbol: usize,
    pub total_writes: u64,
    pub total_rows: u64,
    pub recompute_hints: u64,
}

/// In-memory bar store
///
/// Features:
/// - Bounded memory: oldest bars dropped per symbol beyond `max_bars_per_symbol`
/// - Upsert: a bar for the period already at the tail replaces it
/// - Recompute hint: returned when a write opens a new period (the previous bar closed)
pub struct InMemoryBarStore {
    bars: DashMap<String, VecDeque<OhlcvBar>>,
    max_bars_per_symbol: usize,
    total_writes: AtomicU64,
    total_rows: AtomicU64,
    recompute_hints: AtomicU64,
}

impl InMemoryBarStore {
    pub fn new(max_bars_per_symbol: usize) -> Self {
        Self {
            bars: DashMap::new(),
            max_bars_per_symbol: max_bars_per_symbol.max(1),
            total_writes: AtomicU64::new(0),
            total_rows: AtomicU64::new(0),
            recompute_hints: AtomicU64::new(0),
        }
    }

    /// Create a store sized from `BAR_STORE_MAX_BARS` or 1440 bars (one day of 1m bars)
    pub fn with_env_config() -> Self {
        let max_bars = std::env::var("BAR_STORE_MAX_BARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1440);

        tracing::info!("📦 Bar store initialized: max_bars_per_symbol={}", max_bars);
        Self::new(max_bars)
    }

    pub fn stats(&self) -> BarStoreStats {
        BarStoreStats {
            symbols: self.bars.len(),
            stored_bars: self.bars.iter().map(|e| e.value().len()).sum(),
            max_bars_per_symbol: self.max_bars_per_symbol,
            total_writes: self.total_writes.load(Ordering::Relaxed),
            total_rows: self.total_rows.load(Ordering::Relaxed),
            recompute_hints: self.recompute_hints.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MarketDataSink for InMemoryBarStore {
    async fn write(&self, symbol: &Symbol, bars: &[OhlcvBar]) -> Result<WriteOutcome, SinkError> {
        if let Some(bad) = bars.iter().find(|b| !b.is_consistent() || b.symbol != symbol.id) {
            return Err(SinkError::Write(format!(
                "rejected bar for {} at {}",
                bad.symbol, bad.open_time
            )));
        }

        let mut outcome = WriteOutcome::default();
        let mut series = self.bars.entry(symbol.id.clone()).or_default();

        for bar in bars {
            let last_open = series.back().map(|b| b.open_time);
            match last_open {
                Some(open) if bar.open_time == open => {
                    if let Some(tail) = series.back_mut() {
                        *tail = bar.clone();
                    }
                    outcome.rows_written += 1;
                }
                // Late bar for an earlier period
                Some(open) if bar.open_time < open => {
                    tracing::debug!(
                        "Dropping out-of-order bar for {} at {}",
                        symbol.id,
                        bar.open_time
                    );
                }
                Some(_) => {
                    series.push_back(bar.clone());
                    outcome.rows_written += 1;
                    outcome.recompute_needed = true;
                }
                None => {
                    series.push_back(bar.clone());
                    outcome.rows_written += 1;
                }
            }

            while series.len() > self.max_bars_per_symbol {
                series.pop_front();
            }
        }
        drop(series);

        self.total_writes.fetch_add(1, Ordering::Relaxed);
        self.total_rows
            .fetch_add(outcome.rows_written as u64, Ordering::Relaxed);
        if outcome.recompute_needed {
            self.recompute_hints.fetch_add(1, Ordering::Relaxed);
        }

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
