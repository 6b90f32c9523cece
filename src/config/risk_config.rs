//! `risk.{limits,control}.*` configuration tree (spec.md §6, §4.7).

use crate::config::env::parse;
use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct RiskLimitsConfig {
    pub max_position_size: f64,
    pub max_total_positions: f64,
    pub max_funding_exposure: f64,
    pub max_trades_per_hour: u32,
    pub min_margin_ratio: f64,
    pub max_drawdown: f64,
    pub max_hourly_loss: f64,
    pub max_daily_loss: f64,
    pub volatility_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct RiskControlConfig {
    pub auto_reduce_position: bool,
    pub auto_adjust_leverage: bool,
    pub position_reduction_ratio: f64,
    pub max_errors_before_unhealthy: u32,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub limits: RiskLimitsConfig,
    pub control: RiskControlConfig,
}

impl RiskConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            limits: RiskLimitsConfig {
                max_position_size: parse("RISK_MAX_POSITION_SIZE", 50_000.0)?,
                max_total_positions: parse("RISK_MAX_TOTAL_POSITIONS", 200_000.0)?,
                max_funding_exposure: parse("RISK_MAX_FUNDING_EXPOSURE", 50.0)?,
                max_trades_per_hour: parse("RISK_MAX_TRADES_PER_HOUR", 20)?,
                min_margin_ratio: parse("RISK_MIN_MARGIN_RATIO", 1.5)?,
                max_drawdown: parse("RISK_MAX_DRAWDOWN", 0.1)?,
                max_hourly_loss: parse("RISK_MAX_HOURLY_LOSS", 1_000.0)?,
                max_daily_loss: parse("RISK_MAX_DAILY_LOSS", 5_000.0)?,
                volatility_threshold: parse("RISK_VOLATILITY_THRESHOLD", 0.05)?,
            },
            control: RiskControlConfig {
                auto_reduce_position: parse("RISK_AUTO_REDUCE_POSITION", true)?,
                auto_adjust_leverage: parse("RISK_AUTO_ADJUST_LEVERAGE", true)?,
                position_reduction_ratio: parse("RISK_POSITION_REDUCTION_RATIO", 0.5)?,
                max_errors_before_unhealthy: parse("RISK_MAX_ERRORS_BEFORE_UNHEALTHY", 3)?,
            },
        })
    }
}
