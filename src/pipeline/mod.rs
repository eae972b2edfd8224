//! Sync pipeline: one update cycle, and the runner that repeats it

pub mod errors;
pub mod retry;
pub mod runner;
pub mod update_cycle;

pub use errors::{CycleError, PipelineError, SymbolError};
pub use retry::RetryPolicy;
pub use runner::{PipelineRunner, RunnerHealthView, RunnerSnapshot};
pub use update_cycle::{CycleAborted, CycleReport, CycleSettings, UpdateCycle};
