//! Scripted collaborators for unit and scenario tests

pub mod doubles;

pub use doubles::{RecordingAlertSink, RecordingSink, ScriptedSource, SymbolScript};

use crate::models::{PriorityTier, Symbol, SymbolCatalog};

/// Catalog built from `(id, tier)` pairs
pub fn catalog(entries: &[(&str, PriorityTier)]) -> SymbolCatalog {
    SymbolCatalog::new(
        entries
            .iter()
            .map(|(id, tier)| Symbol::new(*id, *tier))
            .collect(),
    )
    .expect("valid test catalog")
}

/// Ten symbols: two CRITICAL, five STANDARD, three LOW
pub fn ten_symbol_catalog() -> SymbolCatalog {
    catalog(&[
        ("SPY", PriorityTier::Critical),
        ("QQQ", PriorityTier::Critical),
        ("AAPL", PriorityTier::Standard),
        ("MSFT", PriorityTier::Standard),
        ("AMZN", PriorityTier::Standard),
        ("GOOGL", PriorityTier::Standard),
        ("NVDA", PriorityTier::Standard),
        ("KO", PriorityTier::Low),
        ("PEP", PriorityTier::Low),
        ("T", PriorityTier::Low),
    ])
}
