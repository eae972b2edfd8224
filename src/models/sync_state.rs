use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use super::symbol::{PriorityTier, Symbol, SymbolCatalog};

/// Per-symbol synchronization state
///
/// Owned by the pipeline runner and only mutated by an update cycle.
/// `consecutive_failures` resets to 0 on any success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SymbolSyncState {
    pub symbol: String,

    /// Tier assigned in the catalog
    pub original_tier: PriorityTier,

    /// Tier used for scheduling (differs from `original_tier` while demoted)
    pub effective_tier: PriorityTier,

    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub bars_written: u64,
}

impl SymbolSyncState {
    pub fn new(symbol: &Symbol) -> Self {
        Self {
            symbol: symbol.id.clone(),
            original_tier: symbol.tier,
            effective_tier: symbol.tier,
            last_success_at: None,
            last_attempt_at: None,
            consecutive_failures: 0,
            last_error: None,
            total_successes: 0,
            total_failures: 0,
            bars_written: 0,
        }
    }

    pub fn is_demoted(&self) -> bool {
        self.effective_tier != self.original_tier
    }

    /// Record a successful sync; restores the original tier
    pub fn record_success(&mut self, at: DateTime<Utc>, bars_written: usize) {
        self.last_success_at = Some(at);
        self.last_attempt_at = Some(at);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.total_successes += 1;
        self.bars_written += bars_written as u64;
        self.effective_tier = self.original_tier;
    }

    /// Record a failed sync; demotes one tier below the original once
    /// `consecutive_failures` exceeds `demotion_threshold`
    ///
    /// Returns true when this failure caused a demotion.
    pub fn record_failure(
        &mut self,
        at: DateTime<Utc>,
        error: String,
        demotion_threshold: u32,
    ) -> bool {
        self.last_attempt_at = Some(at);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.total_failures += 1;

        let demoted = self.original_tier.demoted();
        if self.consecutive_failures > demotion_threshold && self.effective_tier != demoted {
            self.effective_tier = demoted;
            return true;
        }
        false
    }

    /// Elapsed time since the last success
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_success_at.map(|t| now - t)
    }
}

/// Sync states for the whole catalog, keyed by symbol id
#[derive(Debug, Clone, Default)]
pub struct SyncStateTable {
    states: HashMap<String, SymbolSyncState>,
}

impl SyncStateTable {
    pub fn from_catalog(catalog: &SymbolCatalog) -> Self {
        Self {
            states: catalog
                .iter()
                .map(|s| (s.id.clone(), SymbolSyncState::new(s)))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolSyncState> {
        self.states.get(symbol)
    }

    /// Mutable entry for a symbol, created from the catalog entry if missing
    pub fn entry(&mut self, symbol: &Symbol) -> &mut SymbolSyncState {
        self.states
            .entry(symbol.id.clone())
            .or_insert_with(|| SymbolSyncState::new(symbol))
    }

    /// Scheduling tier for a symbol (catalog tier when no state exists yet)
    pub fn effective_tier(&self, symbol: &Symbol) -> PriorityTier {
        self.states
            .get(&symbol.id)
            .map(|s| s.effective_tier)
            .unwrap_or(symbol.tier)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &SymbolSyncState> {
        self.states.values()
    }

    /// States sorted by symbol id
    pub fn sorted(&self) -> Vec<SymbolSyncState> {
        let mut states: Vec<_> = self.values().cloned().collect();
        states.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn critical() -> Symbol {
        Symbol::new("AAPL", PriorityTier::Critical)
    }

    #[test]
    fn test_success_resets_failures() {
        let now = Utc::now();
        let mut state = SymbolSyncState::new(&critical());

        state.record_failure(now, "timeout".to_string(), 5);
        state.record_failure(now, "timeout".to_string(), 5);
        assert_eq!(state.consecutive_failures, 2);

        state.record_success(now, 3);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(state.bars_written, 3);
        assert_eq!(state.total_failures, 2);
    }

    #[test]
    fn test_demotion_after_threshold_exceeded() {
        let now = Utc::now();
        let mut state = SymbolSyncState::new(&critical());

        assert!(!state.record_failure(now, "e".to_string(), 2));
        assert!(!state.record_failure(now, "e".to_string(), 2));
        assert_eq!(state.effective_tier, PriorityTier::Critical);

        // Third failure exceeds the threshold of 2
        assert!(state.record_failure(now, "e".to_string(), 2));
        assert_eq!(state.effective_tier, PriorityTier::Standard);

        // No cascading demotion
        assert!(!state.record_failure(now, "e".to_string(), 2));
        assert_eq!(state.effective_tier, PriorityTier::Standard);

        state.record_success(now, 1);
        assert_eq!(state.effective_tier, PriorityTier::Critical);
        assert!(!state.is_demoted());
    }

    #[test]
    fn test_table_entries_follow_catalog() {
        let catalog = SymbolCatalog::parse("C:low,A:critical,B").unwrap();
        let mut table = SyncStateTable::from_catalog(&catalog);
        assert_eq!(table.len(), 3);
        assert!(table.values().all(|s| s.last_success_at.is_none()));

        let t0 = Utc::now() - Duration::minutes(10);
        table.entry(&catalog.symbols()[1]).record_success(t0, 1);

        let sorted = table.sorted();
        let ids: Vec<&str> = sorted.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(table.get("A").unwrap().last_success_at, Some(t0));
    }

    #[test]
    fn test_effective_tier_defaults_to_catalog() {
        let table = SyncStateTable::default();
        assert_eq!(table.effective_tier(&critical()), PriorityTier::Critical);
    }
}
