use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::common::types::{PositionSide, Side};

/// Which half of the book a symbol is targeted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Long,
    Short,
}

impl Bucket {
    /// Side used to enter (or add to) a position in this bucket
    pub fn entry_side(self) -> Side {
        match self {
            Bucket::Long => Side::Buy,
            Bucket::Short => Side::Sell,
        }
    }

    /// Position side held when the bucket is filled
    pub fn position_side(self) -> PositionSide {
        match self {
            Bucket::Long => PositionSide::Long,
            Bucket::Short => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Long => write!(f, "long"),
            Bucket::Short => write!(f, "short"),
        }
    }
}

/// A ranked symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub symbol: String,
    /// Relative move over the lookback window; zero until first ranked
    pub percent_change: Decimal,
}

/// The ranked symbol list
///
/// Lives for a whole trading session so that a failed bar fetch keeps the
/// symbol's previous percent change instead of resetting it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    entries: Vec<UniverseEntry>,
}

impl Universe {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: symbols
                .into_iter()
                .map(|symbol| UniverseEntry {
                    symbol: symbol.into(),
                    percent_change: Decimal::ZERO,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[UniverseEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [UniverseEntry] {
        &mut self.entries
    }

    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.symbol.clone()).collect()
    }

    /// Stable sort, lowest percent change first
    pub fn sort_ascending(&mut self) {
        self.entries.sort_by(|a, b| a.percent_change.cmp(&b.percent_change));
    }
}

/// Long and short target lists for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSets {
    pub long: Vec<String>,
    pub short: Vec<String>,
}

impl TargetSets {
    /// Bucket the symbol is targeted for, if any
    pub fn bucket_of(&self, symbol: &str) -> Option<Bucket> {
        if self.long.iter().any(|s| s == symbol) {
            Some(Bucket::Long)
        } else if self.short.iter().any(|s| s == symbol) {
            Some(Bucket::Short)
        } else {
            None
        }
    }

    pub fn symbols(&self, bucket: Bucket) -> &[String] {
        match bucket {
            Bucket::Long => &self.long,
            Bucket::Short => &self.short,
        }
    }
}

/// Capital and per-symbol share count for each bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSizing {
    pub long_capital: Decimal,
    pub short_capital: Decimal,
    pub q_long: u64,
    pub q_short: u64,
}

impl BucketSizing {
    pub fn capital(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Long => self.long_capital,
            Bucket::Short => self.short_capital,
        }
    }

    pub fn quantity(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::Long => self.q_long,
            Bucket::Short => self.q_short,
        }
    }
}

/// Symbols grouped by outcome of a batch submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub executed: Vec<String>,
    pub incomplete: Vec<String>,
}

/// State threaded through the phases of one rebalance cycle
#[derive(Debug, Clone, Default)]
pub struct CycleContext {
    pub targets: TargetSets,
    pub sizing: BucketSizing,
    /// Symbols reconciled individually; skipped by batch submission
    pub blacklist: HashSet<String>,
    pub executed_long: Vec<String>,
    pub executed_short: Vec<String>,
}

impl CycleContext {
    pub fn new(targets: TargetSets, sizing: BucketSizing) -> Self {
        Self {
            targets,
            sizing,
            ..Self::default()
        }
    }

    pub fn executed(&self, bucket: Bucket) -> &[String] {
        match bucket {
            Bucket::Long => &self.executed_long,
            Bucket::Short => &self.executed_short,
        }
    }

    /// Record a symbol already positioned in its bucket
    pub fn mark_executed(&mut self, bucket: Bucket, symbol: &str) {
        match bucket {
            Bucket::Long => self.executed_long.push(symbol.to_string()),
            Bucket::Short => self.executed_short.push(symbol.to_string()),
        }
        self.blacklist.insert(symbol.to_string());
    }
}

/// Summary of one completed rebalance cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub targets: TargetSets,
    pub sizing: BucketSizing,
    /// Untargeted positions closed this cycle
    pub liquidated: Vec<String>,
    /// Positions closed because their target side flipped
    pub flipped: Vec<String>,
    pub long_batch: BatchResult,
    pub short_batch: BatchResult,
    pub adjusted_q_long: Option<u64>,
    pub adjusted_q_short: Option<u64>,
}

impl CycleReport {
    pub fn batch(&self, bucket: Bucket) -> &BatchResult {
        match bucket {
            Bucket::Long => &self.long_batch,
            Bucket::Short => &self.short_batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sort_is_stable_for_ties() {
        let mut universe = Universe::new(["A", "B", "C"]);
        universe.entries_mut()[0].percent_change = dec!(0.01);
        universe.sort_ascending();
        assert_eq!(universe.symbols(), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_bucket_lookup() {
        let targets = TargetSets {
            long: vec!["AAPL".into()],
            short: vec!["TSLA".into()],
        };
        assert_eq!(targets.bucket_of("AAPL"), Some(Bucket::Long));
        assert_eq!(targets.bucket_of("TSLA"), Some(Bucket::Short));
        assert_eq!(targets.bucket_of("MSFT"), None);
    }

    #[test]
    fn test_mark_executed_blacklists() {
        let mut ctx = CycleContext::default();
        ctx.mark_executed(Bucket::Short, "GM");
        assert_eq!(ctx.executed(Bucket::Short), ["GM".to_string()]);
        assert!(ctx.executed(Bucket::Long).is_empty());
        assert!(ctx.blacklist.contains("GM"));
    }

    #[test]
    fn test_bucket_sides() {
        assert_eq!(Bucket::Long.entry_side(), Side::Buy);
        assert_eq!(Bucket::Short.entry_side(), Side::Sell);
        assert_eq!(Bucket::Short.position_side(), PositionSide::Short);
    }
}
