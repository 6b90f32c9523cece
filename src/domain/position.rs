//! Position Record — exclusively owned by the Position Manager (data model §3).

use serde::{Deserialize, Serialize};

use crate::domain::types::MarginType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    /// Positive = long, negative = short.
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub liquidation_price: f64,
    pub margin: f64,
    pub leverage: f64,
    pub margin_type: MarginType,
    pub updated_at: i64,
}

impl PositionRecord {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.mark_price - self.entry_price) * self.size
    }

    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    /// Invariant (data model §3): liquidation price is strictly on the adverse side of
    /// entry — below entry for longs, above entry for shorts.
    pub fn liquidation_on_adverse_side(&self) -> bool {
        if self.size > 0.0 {
            self.liquidation_price < self.entry_price
        } else if self.size < 0.0 {
            self.liquidation_price > self.entry_price
        } else {
            true
        }
    }

    pub fn within_symbol_cap(&self, cap: f64) -> bool {
        self.size.abs() <= cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> PositionRecord {
        PositionRecord {
            symbol: "BTCUSDT".into(),
            size: 0.5,
            entry_price: 50000.0,
            mark_price: 50500.0,
            liquidation_price: 45000.0,
            margin: 2500.0,
            leverage: 10.0,
            margin_type: MarginType::Cross,
            updated_at: 0,
        }
    }

    #[test]
    fn unrealized_pnl_for_long() {
        let pos = long_position();
        assert!((pos.unrealized_pnl() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn unrealized_pnl_for_short() {
        let mut pos = long_position();
        pos.size = -0.5;
        pos.mark_price = 49500.0;
        assert!((pos.unrealized_pnl() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn liquidation_price_must_be_adverse() {
        let pos = long_position();
        assert!(pos.liquidation_on_adverse_side());

        let mut bad = pos.clone();
        bad.liquidation_price = 55000.0;
        assert!(!bad.liquidation_on_adverse_side());
    }
}
