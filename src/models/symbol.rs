use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use utoipa::ToSchema;

use crate::config::ConfigError;

/// Scheduling class controlling which symbols receive fetch concurrency first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    Critical,
    Standard,
    Low,
}

impl PriorityTier {
    /// Tiers in dispatch order
    pub const ALL: [PriorityTier; 3] = [
        PriorityTier::Critical,
        PriorityTier::Standard,
        PriorityTier::Low,
    ];

    /// One tier below this one (LOW is the floor)
    pub fn demoted(self) -> Self {
        match self {
            PriorityTier::Critical => PriorityTier::Standard,
            PriorityTier::Standard | PriorityTier::Low => PriorityTier::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Critical => "CRITICAL",
            PriorityTier::Standard => "STANDARD",
            PriorityTier::Low => "LOW",
        }
    }

    /// Parse a tier name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "c" => Some(PriorityTier::Critical),
            "standard" | "s" => Some(PriorityTier::Standard),
            "low" | "l" => Some(PriorityTier::Low),
            _ => None,
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked instrument. Loaded once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Symbol {
    pub id: String,
    pub tier: PriorityTier,
}

impl Symbol {
    pub fn new(id: impl Into<String>, tier: PriorityTier) -> Self {
        Self {
            id: id.into(),
            tier,
        }
    }
}

/// Ordered, read-only list of tracked symbols
#[derive(Debug, Clone, Default)]
pub struct SymbolCatalog {
    symbols: Vec<Symbol>,
}

impl SymbolCatalog {
    /// Build a catalog, rejecting an empty list and empty or duplicate ids
    pub fn new(symbols: Vec<Symbol>) -> Result<Self, ConfigError> {
        if symbols.is_empty() {
            return Err(ConfigError::InvalidSymbol(
                "catalog must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if symbol.id.trim().is_empty() {
                return Err(ConfigError::InvalidSymbol(
                    "symbol id must not be empty".to_string(),
                ));
            }
            if !seen.insert(symbol.id.as_str()) {
                return Err(ConfigError::InvalidSymbol(format!(
                    "duplicate symbol id: {}",
                    symbol.id
                )));
            }
        }

        Ok(Self { symbols })
    }

    /// Parse a catalog from `ID[:tier],ID[:tier],...` (tier defaults to STANDARD)
    ///
    /// Example: `AAPL:critical,MSFT:critical,KO,XOM:low`
    pub fn parse(entries: &str) -> Result<Self, ConfigError> {
        let mut symbols = Vec::new();

        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, tier) = match entry.split_once(':') {
                Some((id, tier)) => {
                    let tier = PriorityTier::parse(tier).ok_or_else(|| {
                        ConfigError::InvalidSymbol(format!("unknown tier '{}' for {}", tier, id))
                    })?;
                    (id.trim(), tier)
                }
                None => (entry, PriorityTier::Standard),
            };
            symbols.push(Symbol::new(id.to_ascii_uppercase(), tier));
        }

        Self::new(symbols)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Number of symbols per original tier
    pub fn tier_counts(&self) -> [(PriorityTier, usize); 3] {
        PriorityTier::ALL.map(|tier| (tier, self.iter().filter(|s| s.tier == tier).count()))
    }
}
