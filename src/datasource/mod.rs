//! Market data collaborators
//!
//! The update cycle only talks to these traits. `SimulatedSource` and the
//! in-memory bar store are reference adapters; production integrations
//! (exchange client, columnar store) implement the same contracts.

pub mod simulated;

pub use simulated::{SimulatedSource, SimulatedSourceConfig};

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{OhlcvBar, Symbol};

/// Fatal source error: the whole source is unreachable, not just one symbol
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("Market data source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    /// Transient, affects only the symbol being written
    #[error("Write failed: {0}")]
    Write(String),

    /// Fatal, the store cannot accept writes at all
    #[error("Bar store unavailable: {0}")]
    Unavailable(String),
}

/// Result of one fetch call
///
/// A symbol appears in at most one of the two maps. Symbols missing from both
/// returned nothing this time.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub bars: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_written: usize,
    /// The write changed data that downstream indicators depend on
    pub recompute_needed: bool,
}

/// Source of latest bars (exchange / broker API)
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the latest bars for `symbols`
    async fn fetch(&self, symbols: &[Symbol]) -> Result<FetchBatch, SourceError>;

    fn name(&self) -> &str;
}

/// Destination for fetched bars (time-series store)
#[async_trait]
pub trait MarketDataSink: Send + Sync {
    async fn write(&self, symbol: &Symbol, bars: &[OhlcvBar]) -> Result<WriteOutcome, SinkError>;

    fn name(&self) -> &str;
}
