//! Capability-set abstraction the core consumes from a concrete exchange adapter
//! (DESIGN NOTES §9: inheritance/virtual dispatch maps to a trait-style contract).
//! Grounded on the teacher's `domain/ports.rs` (`MarketDataService`/`ExecutionService`
//! async traits), generalized to the single perpetual-futures-venue surface spec.md §4.2
//! and §6 describe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;

use crate::domain::errors::EngineError;
use crate::domain::types::OrderRecord;
use crate::domain::types::OrderRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    MarkPrice { symbol: String, price: f64, at: i64 },
    FundingRate { symbol: String, rate: f64, next_funding_time: i64, at: i64 },
    BookTicker { symbol: String, bid: f64, ask: f64, at: i64 },
    OrderUpdate(OrderRecord),
    AccountUpdate { asset: String, balance: f64, at: i64 },
    PositionUpdate {
        symbol: String,
        size: f64,
        entry_price: f64,
        mark_price: f64,
        liquidation_price: f64,
        margin: f64,
        leverage: f64,
        at: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamChannel {
    MarkPrice,
    FundingRate,
    BookTicker,
}

/// Operations the core requires from an exchange adapter, each atomic from the
/// caller's view (spec.md §4.2). Concrete adapters (Binance, a mock for tests) are
/// swapped without touching the core.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_mark_price(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_spot_price(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_last_price(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_next_funding_time(&self, symbol: &str) -> Result<i64, EngineError>;
    async fn get_24h_volume(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_best_bid_ask(&self, symbol: &str) -> Result<(f64, f64), EngineError>;
    async fn get_order_book_depth(
        &self,
        symbol: &str,
        is_spot: bool,
    ) -> Result<Vec<BookLevel>, EngineError>;
    async fn get_balance(&self, asset: &str) -> Result<f64, EngineError>;
    async fn get_tradable_symbols(&self) -> Result<Vec<String>, EngineError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<String, EngineError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError>;
    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderRecord, EngineError>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, EngineError>;
    async fn get_open_positions(&self) -> Result<Vec<crate::domain::position::PositionRecord>, EngineError>;
    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<(), EngineError>;
    async fn set_margin_type(
        &self,
        symbol: &str,
        mode: crate::domain::types::MarginType,
    ) -> Result<(), EngineError>;

    /// Subscribe to a set of streaming channels for a symbol; returns a receiver fed by
    /// the adapter's background stream-receiver thread. Re-subscribing replaces nothing —
    /// callers own unsubscribe.
    async fn subscribe(
        &self,
        symbol: &str,
        channels: &[StreamChannel],
    ) -> Result<Receiver<StreamEvent>, EngineError>;
    async fn unsubscribe(&self, symbol: &str, channels: &[StreamChannel]) -> Result<(), EngineError>;
}
