//! Risk Metrics and Risk Event types (data model §3), plus the hourly drawdown series
//! described in spec.md §4.8. Grounded on the teacher's `domain/risk/state.rs` rolling
//! high-water-mark pattern, generalized from equity-curve HWM to an hourly PnL ring.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskEventKind {
    MarginCall,
    LiquidationWarning,
    DrawdownLimitBreach,
    DailyLossLimitBreach,
    PositionLimitBreach,
    HighVolatility,
    FundingRateWarning,
    TradeFrequencyWarning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskEventKind,
    pub symbol: Option<String>,
    pub current_value: f64,
    pub threshold: f64,
    pub at: i64,
}

/// Retained for 24 hours then evicted (data model §3).
pub const RISK_EVENT_RETENTION_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub total_exposure: f64,
    pub largest_position: f64,
    pub hourly_pnl: f64,
    pub daily_pnl: f64,
    pub current_drawdown: f64,
    pub peak_equity: f64,
    pub trade_count_last_hour: u32,
}

/// Hourly rolling PnL series of length 24 (spec.md §4.8).
#[derive(Debug, Clone, Default)]
pub struct DrawdownTracker {
    hourly_pnl: VecDeque<f64>,
    pub max_drawdown: f64,
}

const DRAWDOWN_SERIES_LEN: usize = 24;

impl DrawdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the current total PnL for the elapsed hour, evicting the oldest entry.
    pub fn record_hour(&mut self, total_pnl: f64) {
        if self.hourly_pnl.len() == DRAWDOWN_SERIES_LEN {
            self.hourly_pnl.pop_front();
        }
        self.hourly_pnl.push_back(total_pnl);
        let drawdown = self.current_drawdown();
        self.max_drawdown = self.max_drawdown.max(drawdown);
    }

    pub fn peak_equity(&self) -> f64 {
        self.hourly_pnl
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max)
            .max(0.0)
    }

    pub fn current_drawdown(&self) -> f64 {
        let peak = self.peak_equity();
        let current = self.hourly_pnl.back().copied().unwrap_or(0.0);
        if peak > 0.0 {
            (peak - current) / peak
        } else {
            0.0
        }
    }

    /// Sum of the rolling series, used as the daily PnL proxy (the series holds at most
    /// 24 hourly entries, i.e. one day).
    pub fn daily_pnl(&self) -> f64 {
        self.hourly_pnl.iter().sum()
    }
}
