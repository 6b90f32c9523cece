//! Pair State — exclusively owned by the Strategy Engine (data model §3).

use serde::{Deserialize, Serialize};

/// Default imbalance tolerance ε (spec.md §3, §4.6).
pub const DEFAULT_IMBALANCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairState {
    pub symbol: String,
    pub spot_size: f64,
    pub futures_size: f64,
    pub entry_basis: f64,
    pub opened_at: i64,
    pub target_funding_time: i64,
}

impl PairState {
    pub fn imbalance(&self) -> f64 {
        (self.spot_size + self.futures_size).abs()
    }

    pub fn is_balanced(&self, tolerance: f64) -> bool {
        self.imbalance() <= tolerance
    }
}
