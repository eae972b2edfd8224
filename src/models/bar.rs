use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,

    #[serde(rename = "5m")]
    FiveMinutes,

    #[serde(rename = "15m")]
    FifteenMinutes,

    #[serde(rename = "1h")]
    OneHour,

    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::OneDay => "1d",
        }
    }

    pub fn duration_seconds(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 60,
            Timeframe::FiveMinutes => 300,
            Timeframe::FifteenMinutes => 900,
            Timeframe::OneHour => 3600,
            Timeframe::OneDay => 86400,
        }
    }

    /// Start of the bar period containing `ts`
    pub fn period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.duration_seconds();
        let floored = ts.timestamp().div_euclid(secs) * secs;
        Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OHLCV bar as delivered by a market data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OhlcvBar {
    pub symbol: String,

    pub timeframe: Timeframe,

    /// Period open time (bars are keyed by symbol + timeframe + open_time)
    pub open_time: DateTime<Utc>,

    #[schema(value_type = String, example = "187.12")]
    pub open: Decimal,

    #[schema(value_type = String, example = "188.40")]
    pub high: Decimal,

    #[schema(value_type = String, example = "186.95")]
    pub low: Decimal,

    #[schema(value_type = String, example = "188.02")]
    pub close: Decimal,

    #[schema(value_type = String, example = "152300")]
    pub volume: Decimal,
}

impl OhlcvBar {
    /// High/low bracket open and close, volume non-negative
    pub fn is_consistent(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= Decimal::ZERO
    }
}
