//! Application layer: orchestrates the domain types through the ports the
//! infrastructure layer implements (spec.md §4, components above the Exchange Adapter).

pub mod alerts;
pub mod bootstrap;
pub mod market_data_cache;
pub mod monitor;
pub mod order_manager;
pub mod position_manager;
pub mod risk_controller;
pub mod strategy_engine;

pub use alerts::{AlertSink, AlertSeverity, LogAlertSink};
pub use bootstrap::Engine;
pub use market_data_cache::MarketDataCache;
pub use monitor::{FundingRateLog, Metrics};
pub use order_manager::OrderManager;
pub use position_manager::PositionManager;
pub use risk_controller::RiskController;
pub use strategy_engine::StrategyEngine;
