use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

use super::ConfigError;

const DEFAULT_SYMBOLS: &str = "SPY:critical,QQQ:critical,AAPL:critical,MSFT,AMZN,GOOGL,NVDA,META,\
                               TSLA,JPM,XOM,KO:low,PEP:low,T:low";

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub calendar: CalendarConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    /// Symbol catalog, `ID[:tier],...`
    pub symbols: String,
}

/// REST control surface settings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Upper bound a control request waits for a transition before answering
    pub control_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Fallback filter when RUST_LOG is unset
    pub filter: String,
}

/// Trading session definition
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CalendarConfig {
    /// Session open, exchange-local `HH:MM`
    pub open_time: String,

    /// Session close, exchange-local `HH:MM`
    pub close_time: String,

    /// IANA timezone name, e.g. "America/New_York"
    pub timezone: String,

    /// Trading weekdays, e.g. ["Mon", "Tue", "Wed", "Thu", "Fri"]
    pub trading_days: Vec<String>,

    /// Exchange holidays as ISO dates
    pub holidays: Vec<String>,

    /// Length of the PRE_OPEN window before the open
    pub pre_open_minutes: u32,
}

/// Per-symbol retry policy inside a cycle
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

/// Update cycle and runner settings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cadence of the scheduler driver (one cycle per interval)
    pub interval_secs: u64,

    /// Concurrent symbol syncs within a tier batch
    pub concurrency_limit: usize,

    pub fetch_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub cycle_timeout_secs: u64,
    pub retry: RetryConfig,

    /// Consecutive failures a symbol may exceed before it is demoted one tier
    pub demotion_threshold: u32,

    /// If the first K completed symbols of a cycle all fail, the cycle is
    /// aborted as a systemic failure (0 disables)
    pub systemic_failure_window: usize,

    /// Cycle results kept in memory
    pub history_capacity: usize,

    /// How long stop() lets an in-flight cycle finish before cancelling it
    pub shutdown_grace_secs: u64,

    /// How long a cancelled cycle gets to unwind
    pub abandon_timeout_ms: u64,

    /// Consecutive cycle-fatal failures before the runner reports degraded
    pub degraded_after: u32,
}

/// Scheduler lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start automatically when the session opens
    pub auto_start: bool,

    /// Auto-restarts allowed per session before manual restart is required
    pub max_auto_restarts: u32,

    /// Base delay before an automatic restart (doubles per restart)
    pub restart_backoff_secs: u64,
    pub max_restart_backoff_secs: u64,
}

/// Relative weight of each health component
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HealthWeights {
    pub running_state: f64,
    pub error_rate: f64,
    pub freshness: f64,
    pub performance: f64,
}

/// Component thresholds; credit decays linearly from threshold to ceiling
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HealthThresholds {
    pub error_rate_threshold: f64,
    pub error_rate_ceiling: f64,
    pub staleness_secs: u64,
    pub staleness_ceiling_secs: u64,
    pub cycle_sla_ms: u64,
    pub cycle_sla_ceiling_ms: u64,
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HealthConfig {
    pub sample_interval_secs: u64,

    /// Minimum time between two alerts with the same code
    pub alert_cooldown_secs: u64,

    /// Score below this raises HEALTH_SCORE_LOW
    pub low_watermark: f64,

    /// Score at or above this clears HEALTH_SCORE_LOW
    pub recovery_watermark: f64,

    /// Freshness credit below this raises DATA_STALE
    pub freshness_alert_below: f64,

    /// Freshness credit at or above this clears DATA_STALE
    pub freshness_clear_at: f64,

    pub history_capacity: usize,

    /// Cycles considered for the recent error rate
    pub error_rate_window: usize,

    /// Cycles considered for the performance component
    pub performance_window: usize,

    pub delivery_timeout_ms: u64,
    pub weights: HealthWeights,
    pub thresholds: HealthThresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            calendar: CalendarConfig::default(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
            health: HealthConfig::default(),
            symbols: DEFAULT_SYMBOLS.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            control_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "market_sync=debug,tower_http=info".to_string(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            open_time: "09:30".to_string(),
            close_time: "16:00".to_string(),
            timezone: "America/New_York".to_string(),
            trading_days: ["Mon", "Tue", "Wed", "Thu", "Fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            holidays: Vec::new(),
            pre_open_minutes: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            concurrency_limit: 8,
            fetch_timeout_ms: 5000,
            write_timeout_ms: 5000,
            cycle_timeout_secs: 45,
            retry: RetryConfig::default(),
            demotion_threshold: 2,
            systemic_failure_window: 5,
            history_capacity: 100,
            shutdown_grace_secs: 10,
            abandon_timeout_ms: 2000,
            degraded_after: 3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            max_auto_restarts: 3,
            restart_backoff_secs: 30,
            max_restart_backoff_secs: 300,
        }
    }
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            running_state: 40.0,
            error_rate: 25.0,
            freshness: 20.0,
            performance: 15.0,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.05,
            error_rate_ceiling: 0.5,
            staleness_secs: 300,
            staleness_ceiling_secs: 1800,
            cycle_sla_ms: 30_000,
            cycle_sla_ceiling_ms: 120_000,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            alert_cooldown_secs: 300,
            low_watermark: 50.0,
            recovery_watermark: 60.0,
            freshness_alert_below: 0.9,
            freshness_clear_at: 0.95,
            history_capacity: 120,
            error_rate_window: 10,
            performance_window: 5,
            delivery_timeout_ms: 5000,
            weights: HealthWeights::default(),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Overwrite `slot` with the parsed value of `key` when it is set
fn env_override<T: FromStr>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *slot = raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidVar {
            key: key.to_string(),
            message: format!("'{}': {}", raw, e),
        })?;
    }
    Ok(())
}

/// Overwrite `slot` with a comma-separated list when `key` is set
fn env_list_override(key: &str, slot: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
}

fn secs_to_ms(key: &str, secs: u64) -> Result<u64, ConfigError> {
    secs.checked_mul(1000).ok_or_else(|| ConfigError::InvalidVar {
        key: key.to_string(),
        message: format!("{} seconds is out of range", secs),
    })
}

impl AppConfig {
    /// Build configuration from environment variables (with defaults) and validate it
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut c = AppConfig::default();

        env_override("SYNC_SYMBOLS", &mut c.symbols)?;
        env_override("SYNC_BIND_ADDR", &mut c.server.bind_addr)?;
        env_override("SYNC_CONTROL_TIMEOUT_MS", &mut c.server.control_timeout_ms)?;
        env_override("LOG_FORMAT", &mut c.logging.format)?;

        let cal = &mut c.calendar;
        env_override("MARKET_OPEN", &mut cal.open_time)?;
        env_override("MARKET_CLOSE", &mut cal.close_time)?;
        env_override("MARKET_TIMEZONE", &mut cal.timezone)?;
        env_list_override("MARKET_TRADING_DAYS", &mut cal.trading_days);
        env_list_override("MARKET_HOLIDAYS", &mut cal.holidays);
        env_override("MARKET_PRE_OPEN_MINUTES", &mut cal.pre_open_minutes)?;

        let p = &mut c.pipeline;
        env_override("SYNC_INTERVAL_SECS", &mut p.interval_secs)?;
        env_override("SYNC_CONCURRENCY", &mut p.concurrency_limit)?;
        env_override("SYNC_FETCH_TIMEOUT_MS", &mut p.fetch_timeout_ms)?;
        env_override("SYNC_WRITE_TIMEOUT_MS", &mut p.write_timeout_ms)?;
        env_override("SYNC_CYCLE_TIMEOUT_SECS", &mut p.cycle_timeout_secs)?;
        env_override("SYNC_MAX_RETRIES", &mut p.retry.max_retries)?;
        env_override("SYNC_RETRY_INITIAL_DELAY_MS", &mut p.retry.initial_delay_ms)?;
        env_override("SYNC_RETRY_MAX_DELAY_MS", &mut p.retry.max_delay_ms)?;
        env_override("SYNC_DEMOTION_THRESHOLD", &mut p.demotion_threshold)?;
        env_override("SYNC_SYSTEMIC_FAILURE_WINDOW", &mut p.systemic_failure_window)?;
        env_override("SYNC_HISTORY_CAPACITY", &mut p.history_capacity)?;
        env_override("SYNC_SHUTDOWN_GRACE_SECS", &mut p.shutdown_grace_secs)?;
        env_override("SYNC_DEGRADED_AFTER", &mut p.degraded_after)?;

        let s = &mut c.scheduler;
        env_override("SCHEDULER_AUTO_START", &mut s.auto_start)?;
        env_override("SCHEDULER_MAX_AUTO_RESTARTS", &mut s.max_auto_restarts)?;
        env_override("SCHEDULER_RESTART_BACKOFF_SECS", &mut s.restart_backoff_secs)?;

        let h = &mut c.health;
        env_override("HEALTH_SAMPLE_INTERVAL_SECS", &mut h.sample_interval_secs)?;
        env_override("HEALTH_ALERT_COOLDOWN_SECS", &mut h.alert_cooldown_secs)?;
        env_override("HEALTH_LOW_WATERMARK", &mut h.low_watermark)?;
        env_override("HEALTH_RECOVERY_WATERMARK", &mut h.recovery_watermark)?;

        // Ceilings follow their threshold unless set explicitly
        let t = &mut h.thresholds;
        env_override("HEALTH_STALENESS_SECS", &mut t.staleness_secs)?;
        t.staleness_ceiling_secs = t
            .staleness_ceiling_secs
            .max(t.staleness_secs.saturating_mul(6));
        env_override("HEALTH_STALENESS_CEILING_SECS", &mut t.staleness_ceiling_secs)?;

        let mut sla_secs = t.cycle_sla_ms / 1000;
        env_override("HEALTH_CYCLE_SLA_SECS", &mut sla_secs)?;
        t.cycle_sla_ms = secs_to_ms("HEALTH_CYCLE_SLA_SECS", sla_secs)?;
        let mut sla_ceiling_secs = (t.cycle_sla_ceiling_ms / 1000).max(sla_secs.saturating_mul(4));
        env_override("HEALTH_CYCLE_SLA_CEILING_SECS", &mut sla_ceiling_secs)?;
        t.cycle_sla_ceiling_ms = secs_to_ms("HEALTH_CYCLE_SLA_CEILING_SECS", sla_ceiling_secs)?;

        c.validate()?;
        Ok(c)
    }

    /// Cross-field validation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.interval_secs == 0 {
            return Err(ConfigError::InvalidPipeline(
                "interval_secs must be > 0".to_string(),
            ));
        }
        if p.concurrency_limit == 0 {
            return Err(ConfigError::InvalidPipeline(
                "concurrency_limit must be > 0".to_string(),
            ));
        }
        if p.fetch_timeout_ms == 0 || p.write_timeout_ms == 0 || p.cycle_timeout_secs == 0 {
            return Err(ConfigError::InvalidPipeline(
                "timeouts must be > 0".to_string(),
            ));
        }
        if p.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidPipeline(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if p.degraded_after == 0 {
            return Err(ConfigError::InvalidPipeline(
                "degraded_after must be > 0".to_string(),
            ));
        }

        let h = &self.health;
        if h.sample_interval_secs == 0 {
            return Err(ConfigError::InvalidHealth(
                "sample_interval_secs must be > 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&h.low_watermark) || h.recovery_watermark < h.low_watermark {
            return Err(ConfigError::InvalidHealth(format!(
                "watermarks must satisfy 0 <= low ({}) <= recovery ({})",
                h.low_watermark, h.recovery_watermark
            )));
        }
        if h.freshness_clear_at < h.freshness_alert_below {
            return Err(ConfigError::InvalidHealth(
                "freshness_clear_at must be >= freshness_alert_below".to_string(),
            ));
        }
        let w = &h.weights;
        if [w.running_state, w.error_rate, w.freshness, w.performance]
            .iter()
            .any(|v| *v < 0.0)
        {
            return Err(ConfigError::InvalidHealth(
                "weights must be non-negative".to_string(),
            ));
        }
        let t = &h.thresholds;
        if t.error_rate_ceiling <= t.error_rate_threshold
            || t.staleness_ceiling_secs <= t.staleness_secs
            || t.cycle_sla_ceiling_ms <= t.cycle_sla_ms
        {
            return Err(ConfigError::InvalidHealth(
                "each threshold ceiling must exceed its threshold".to_string(),
            ));
        }

        Ok(())
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn abandon_timeout(&self) -> Duration {
        Duration::from_millis(self.abandon_timeout_ms)
    }
}

impl HealthConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl ServerConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}
