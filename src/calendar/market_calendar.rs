use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone,
    Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use utoipa::ToSchema;

use crate::config::{CalendarConfig, ConfigError};

/// Days searched by `next_open_after`
const NEXT_OPEN_LOOKAHEAD_DAYS: i64 = 14;

/// Session phase at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Closed,
    PreOpen,
    Open,
    ClosedAfterHours,
}

impl SessionPhase {
    pub fn is_open(self) -> bool {
        self == SessionPhase::Open
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Closed => "CLOSED",
            SessionPhase::PreOpen => "PRE_OPEN",
            SessionPhase::Open => "OPEN",
            SessionPhase::ClosedAfterHours => "CLOSED_AFTER_HOURS",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange session calendar
///
/// Pure: `session_phase` depends only on its argument and the configuration
/// captured at construction.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    pre_open: NaiveTime,
    trading_days: HashSet<Weekday>,
    holidays: HashSet<NaiveDate>,
}

fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|e| ConfigError::InvalidCalendar(format!("{} '{}': {}", field, raw, e)))
}

impl MarketCalendar {
    /// Build a calendar, rejecting inconsistent configuration
    pub fn new(config: &CalendarConfig) -> Result<Self, ConfigError> {
        let timezone = config.timezone.parse::<Tz>().map_err(|e| {
            ConfigError::InvalidCalendar(format!("timezone '{}': {}", config.timezone, e))
        })?;

        let open = parse_time("open_time", &config.open_time)?;
        let close = parse_time("close_time", &config.close_time)?;
        if close <= open {
            return Err(ConfigError::InvalidCalendar(format!(
                "close {} must be after open {}",
                close, open
            )));
        }

        let pre_open_secs = config
            .pre_open_minutes
            .checked_mul(60)
            .filter(|secs| *secs <= open.num_seconds_from_midnight());
        let Some(pre_open_secs) = pre_open_secs else {
            return Err(ConfigError::InvalidCalendar(format!(
                "pre-open window of {} minutes starts before midnight",
                config.pre_open_minutes
            )));
        };
        let pre_open = open - ChronoDuration::seconds(pre_open_secs as i64);

        let trading_days = config
            .trading_days
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Weekday>()
                    .map_err(|_| ConfigError::InvalidCalendar(format!("unknown weekday '{}'", d)))
            })
            .collect::<Result<HashSet<_>, _>>()?;
        if trading_days.is_empty() {
            return Err(ConfigError::InvalidCalendar(
                "at least one trading day is required".to_string(),
            ));
        }

        let holidays = config
            .holidays
            .iter()
            .map(|d| {
                d.trim().parse::<NaiveDate>().map_err(|e| {
                    ConfigError::InvalidCalendar(format!("holiday '{}': {}", d, e))
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            timezone,
            open,
            close,
            pre_open,
            trading_days,
            holidays,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn is_trading_date(&self, date: NaiveDate) -> bool {
        self.trading_days.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    /// Session phase at `now`
    pub fn session_phase(&self, now: DateTime<Utc>) -> SessionPhase {
        let local = now.with_timezone(&self.timezone);
        if !self.is_trading_date(local.date_naive()) {
            return SessionPhase::Closed;
        }

        let time = local.time();
        if time >= self.close {
            SessionPhase::ClosedAfterHours
        } else if time >= self.open {
            SessionPhase::Open
        } else if time >= self.pre_open {
            SessionPhase::PreOpen
        } else {
            SessionPhase::Closed
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.session_phase(now).is_open()
    }

    /// First instant at or after `now` when the session is OPEN
    pub fn next_open_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_open(now) {
            return Some(now);
        }

        let today = now.with_timezone(&self.timezone).date_naive();
        for offset in 0..=NEXT_OPEN_LOOKAHEAD_DAYS {
            let date = today + ChronoDuration::days(offset);
            if !self.is_trading_date(date) {
                continue;
            }

            let open_at = match self.timezone.from_local_datetime(&date.and_time(self.open)) {
                LocalResult::Single(dt) => dt,
                LocalResult::Ambiguous(earliest, _) => earliest,
                // Open falls inside a DST gap
                LocalResult::None => continue,
            };
            let open_at = open_at.with_timezone(&Utc);
            if open_at >= now {
                return Some(open_at);
            }
        }

        None
    }
}
