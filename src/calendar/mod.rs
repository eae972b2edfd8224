//! Trading session calendar
//!
//! Maps wall-clock time to a session phase for one exchange. All session
//! boundaries are exchange-local and resolved through `chrono_tz`, so DST
//! transitions are handled by the timezone database.

pub mod market_calendar;

pub use market_calendar::{MarketCalendar, SessionPhase};
