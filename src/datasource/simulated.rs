use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{FetchBatch, MarketDataSource, SourceError};
use crate::models::{OhlcvBar, Symbol, Timeframe};

/// Configuration for the simulated random-walk source
#[derive(Debug, Clone)]
pub struct SimulatedSourceConfig {
    pub timeframe: Timeframe,
    pub starting_price: Decimal,
    /// Max relative move per bar, e.g. 0.002 = 0.2%
    pub volatility: f64,
    /// Probability that a single symbol fetch fails
    pub failure_rate: f64,
    /// Simulated request latency
    pub latency: Duration,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::OneMinute,
            starting_price: dec!(100.00),
            volatility: 0.002,
            failure_rate: 0.02,
            latency: Duration::from_millis(25),
        }
    }
}

/// Random-walk bar generator standing in for the exchange client
pub struct SimulatedSource {
    config: SimulatedSourceConfig,
    last_close: Mutex<HashMap<String, Decimal>>,
}

impl SimulatedSource {
    pub fn new(config: SimulatedSourceConfig) -> Self {
        Self {
            config,
            last_close: Mutex::new(HashMap::new()),
        }
    }

    fn next_bar(&self, symbol: &str, now: DateTime<Utc>) -> OhlcvBar {
        let mut rng = rand::rng();
        let mut closes = self.last_close.lock();
        let open = *closes
            .entry(symbol.to_string())
            .or_insert(self.config.starting_price);

        let step = |rng: &mut rand::rngs::ThreadRng, base: Decimal| -> Decimal {
            let pct = rng.random_range(-self.config.volatility..=self.config.volatility);
            let factor = Decimal::from_f64_retain(1.0 + pct).unwrap_or(Decimal::ONE);
            (base * factor).round_dp(2)
        };

        let close = step(&mut rng, open);
        let wick_up = step(&mut rng, open.max(close)).max(open.max(close));
        let wick_down = step(&mut rng, open.min(close)).min(open.min(close));
        let volume = Decimal::from(rng.random_range(100u32..10_000));

        closes.insert(symbol.to_string(), close);

        OhlcvBar {
            symbol: symbol.to_string(),
            timeframe: self.config.timeframe,
            open_time: self.config.timeframe.period_start(now),
            open,
            high: wick_up,
            low: wick_down,
            close,
            volume,
        }
    }
}

#[async_trait]
impl MarketDataSource for SimulatedSource {
    async fn fetch(&self, symbols: &[Symbol]) -> Result<FetchBatch, SourceError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        let now = Utc::now();
        let mut batch = FetchBatch::default();
        for symbol in symbols {
            let fail = rand::rng().random_bool(self.config.failure_rate.clamp(0.0, 1.0));
            if fail {
                debug!("Simulated fetch error for {}", symbol.id);
                batch.errors.insert(
                    symbol.id.clone(),
                    "simulated upstream error: rate limited".to_string(),
                );
            } else {
                let bar = self.next_bar(&symbol.id, now);
                batch.bars.insert(symbol.id.clone(), vec![bar]);
            }
        }

        Ok(batch)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
