/// Storage backends for synced bars
///
/// This module provides:
/// - An in-memory bar store implementing `MarketDataSink`
/// - Bounded per-symbol retention and write statistics

pub mod bar_store;

pub use bar_store::{BarStoreStats, InMemoryBarStore};
