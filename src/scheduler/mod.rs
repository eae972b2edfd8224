//! Scheduler lifecycle: calendar gating, auto-restart and the driver loop

pub mod errors;
pub mod state_machine;

#[cfg(test)]
mod scenario_tests;

pub use errors::SchedulerError;
pub use state_machine::Scheduler;
