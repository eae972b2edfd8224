//! Error types for the sync pipeline
//!
//! Three layers, each contained by the one above it:
//! - `SymbolError`: one symbol failed after its retries; never escapes the cycle
//! - `CycleError`: the cycle ended early; escapes the cycle, never the runner
//! - `PipelineError`: returned by `PipelineRunner::tick`

use std::time::Duration;
use thiserror::Error;

/// Transient, per-symbol failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SymbolError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Cycle-fatal failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CycleError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The first `window` completed symbols of the cycle all failed
    #[error("Systemic failure: first {window} symbols failed, last error: {last_error}")]
    SystemicFailure { window: usize, last_error: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline runner is not running")]
    NotRunning,

    #[error("Cycle {cycle_id} aborted: {source}")]
    Cycle {
        cycle_id: u64,
        #[source]
        source: CycleError,
    },

    #[error("Metrics initialisation failed: {0}")]
    Metrics(String),
}
