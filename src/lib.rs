// Library Crate Root
// lib.rs

// main.rs imports through lib.rs like an external crate
pub mod api;
pub mod calendar;
pub mod config;
pub mod database;
pub mod datasource;
pub mod health;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod scheduler;

#[cfg(test)]
pub mod testing;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use calendar::{MarketCalendar, SessionPhase};
pub use config::{AppConfig, ConfigError};
pub use health::HealthMonitor;
pub use pipeline::PipelineRunner;
pub use scheduler::Scheduler;
