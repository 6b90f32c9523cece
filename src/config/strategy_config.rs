//! `strategy.funding_arbitrage.*` configuration tree (spec.md §6).

use crate::config::env::parse;
use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct FundingArbitrageConfig {
    pub top_n_instruments: usize,
    pub min_basis_ratio: f64,
    pub min_funding_rate: f64,
    pub pre_funding_minutes: i64,
    pub position_size_usd: f64,
    pub max_position_per_symbol: f64,
    pub max_total_position: f64,
    pub min_liquidity_score: f64,
    pub max_spread_ratio: f64,
    pub min_volume_usd: f64,
    pub min_market_impact_minutes: i64,
    pub use_twap: bool,
    pub twap_intervals: u32,
    pub execution_timeout_seconds: u64,
    pub max_slippage: f64,
    pub use_post_only: bool,
    pub stop_loss_ratio: f64,
    pub profit_take_ratio: f64,
    pub max_drawdown: f64,
    pub position_imbalance_tolerance: f64,
    pub trading_fee: f64,
    pub tick_interval_seconds: u64,
    pub tick_error_backoff_seconds: u64,
}

impl FundingArbitrageConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            top_n_instruments: parse("FUNDING_ARB_TOP_N_INSTRUMENTS", 5)?,
            min_basis_ratio: parse("FUNDING_ARB_MIN_BASIS_RATIO", 8e-4)?,
            min_funding_rate: parse("FUNDING_ARB_MIN_FUNDING_RATE", 1e-4)?,
            pre_funding_minutes: parse("FUNDING_ARB_PRE_FUNDING_MINUTES", 60)?,
            position_size_usd: parse("FUNDING_ARB_POSITION_SIZE_USD", 1000.0)?,
            max_position_per_symbol: parse("FUNDING_ARB_MAX_POSITION_PER_SYMBOL", 0.1)?,
            max_total_position: parse("FUNDING_ARB_MAX_TOTAL_POSITION", 0.5)?,
            min_liquidity_score: parse("FUNDING_ARB_MIN_LIQUIDITY_SCORE", 0.3)?,
            max_spread_ratio: parse("FUNDING_ARB_MAX_SPREAD_RATIO", 1e-3)?,
            min_volume_usd: parse("FUNDING_ARB_MIN_VOLUME_USD", 1e6)?,
            min_market_impact_minutes: parse("FUNDING_ARB_MIN_MARKET_IMPACT_MINUTES", 5)?,
            use_twap: parse("FUNDING_ARB_USE_TWAP", true)?,
            twap_intervals: parse("FUNDING_ARB_TWAP_INTERVALS", 3)?,
            execution_timeout_seconds: parse("FUNDING_ARB_EXECUTION_TIMEOUT_SECONDS", 30)?,
            max_slippage: parse("FUNDING_ARB_MAX_SLIPPAGE", 0.001)?,
            use_post_only: parse("FUNDING_ARB_USE_POST_ONLY", false)?,
            stop_loss_ratio: parse("FUNDING_ARB_STOP_LOSS_RATIO", 0.005)?,
            profit_take_ratio: parse("FUNDING_ARB_PROFIT_TAKE_RATIO", 0.003)?,
            max_drawdown: parse("FUNDING_ARB_MAX_DRAWDOWN", 0.1)?,
            position_imbalance_tolerance: parse("FUNDING_ARB_POSITION_IMBALANCE_TOLERANCE", 0.01)?,
            trading_fee: parse("FUNDING_ARB_TRADING_FEE", 0.0004)?,
            tick_interval_seconds: parse("FUNDING_ARB_TICK_INTERVAL_SECONDS", 5)?,
            tick_error_backoff_seconds: parse("FUNDING_ARB_TICK_ERROR_BACKOFF_SECONDS", 5)?,
        })
    }
}
