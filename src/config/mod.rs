//! Service configuration
//!
//! Everything is read once at startup from the environment (optionally via a
//! `.env` file). Invalid configuration is fatal to startup and never
//! recovered at runtime.

pub mod settings;

pub use settings::{
    AppConfig, CalendarConfig, HealthConfig, HealthThresholds, HealthWeights, LogFormat,
    LoggingConfig, PipelineConfig, RetryConfig, SchedulerConfig, ServerConfig,
};

use thiserror::Error;

/// Construction-time configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid environment variable {key}: {message}")]
    InvalidVar { key: String, message: String },

    #[error("Invalid market calendar: {0}")]
    InvalidCalendar(String),

    #[error("Invalid symbol catalog: {0}")]
    InvalidSymbol(String),

    #[error("Invalid pipeline settings: {0}")]
    InvalidPipeline(String),

    #[error("Invalid health settings: {0}")]
    InvalidHealth(String),
}
