//! Configuration module for the funding arbitrage core.
//!
//! Structured loading from environment variables, organized by domain, mirroring the
//! teacher's `config/mod.rs` aggregation of `BrokerEnvConfig`/`StrategyEnvConfig`/
//! `RiskEnvConfig`. The core never parses a config *file* itself (spec.md's Non-goal) —
//! callers load `.env` via `dotenvy` the same way the teacher's `main.rs` does.

mod binance_config;
mod env;
mod monitor_config;
mod risk_config;
mod strategy_config;

pub use binance_config::{BinanceConfig, RateLimitConfig, RetryConfig, WebSocketConfig};
pub use monitor_config::MonitorConfig;
pub use risk_config::{RiskConfig, RiskControlConfig, RiskLimitsConfig};
pub use strategy_config::FundingArbitrageConfig;

use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct Config {
    pub binance: BinanceConfig,
    pub strategy: FundingArbitrageConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            binance: BinanceConfig::from_env()?,
            strategy: FundingArbitrageConfig::from_env()?,
            risk: RiskConfig::from_env()?,
            monitor: MonitorConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_surfaces_as_config_error() {
        // SAFETY: test-only env mutation, single-threaded test harness for this module.
        unsafe {
            std::env::remove_var("BINANCE_API_KEY");
            std::env::remove_var("BINANCE_API_SECRET");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}
