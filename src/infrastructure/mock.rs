//! In-memory `ExchangeAdapter` used by application-layer tests and by examples that
//! exercise the strategy engine without hitting a real venue.
//!
//! Grounded on the teacher's `infrastructure/mock.rs` (`MockMarketDataService`: a
//! `publish`/`set_price` control surface backing a subscriber list), adapted from a
//! single-price quote feed to the funding-rate/mark-price/book snapshot the core's
//! `ExchangeAdapter` trait exposes, plus an in-memory order book for place/cancel/status.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::domain::errors::EngineError;
use crate::domain::ports::{BookLevel, ExchangeAdapter, StreamChannel, StreamEvent};
use crate::domain::position::PositionRecord;
use crate::domain::types::{MarginType, OrderRecord, OrderRequest, OrderStatus};

#[derive(Debug, Clone)]
pub struct MockInstrument {
    pub spot_price: f64,
    pub mark_price: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
    pub volume_24h: f64,
    pub best_bid: f64,
    pub best_ask: f64,
}

pub struct MockExchangeAdapter {
    instruments: Arc<RwLock<HashMap<String, MockInstrument>>>,
    orders: Arc<RwLock<HashMap<String, OrderRecord>>>,
    positions: Arc<RwLock<HashMap<String, PositionRecord>>>,
    balances: Arc<RwLock<HashMap<String, f64>>>,
    next_order_id: AtomicI64,
    /// When true, orders fill immediately at the requested price; otherwise they stay NEW.
    pub auto_fill: bool,
}

impl MockExchangeAdapter {
    pub fn new() -> Self {
        Self {
            instruments: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            positions: Arc::new(RwLock::new(HashMap::new())),
            balances: Arc::new(RwLock::new(HashMap::new())),
            next_order_id: AtomicI64::new(1),
            auto_fill: true,
        }
    }

    pub async fn set_instrument(&self, symbol: &str, instrument: MockInstrument) {
        self.instruments.write().await.insert(symbol.to_string(), instrument);
    }

    pub async fn set_balance(&self, asset: &str, balance: f64) {
        self.balances.write().await.insert(asset.to_string(), balance);
    }

    pub async fn set_position(&self, position: PositionRecord) {
        self.positions.write().await.insert(position.symbol.clone(), position);
    }

    async fn instrument(&self, symbol: &str, operation: &'static str) -> Result<MockInstrument, EngineError> {
        self.instruments
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::invalid_request(operation, Some(symbol.to_string()), "unknown instrument".to_string()))
    }
}

impl Default for MockExchangeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64, EngineError> {
        Ok(self.instrument(symbol, "get_funding_rate").await?.funding_rate)
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<f64, EngineError> {
        Ok(self.instrument(symbol, "get_mark_price").await?.mark_price)
    }

    async fn get_spot_price(&self, symbol: &str) -> Result<f64, EngineError> {
        Ok(self.instrument(symbol, "get_spot_price").await?.spot_price)
    }

    async fn get_last_price(&self, symbol: &str) -> Result<f64, EngineError> {
        Ok(self.instrument(symbol, "get_last_price").await?.mark_price)
    }

    async fn get_next_funding_time(&self, symbol: &str) -> Result<i64, EngineError> {
        Ok(self.instrument(symbol, "get_next_funding_time").await?.next_funding_time)
    }

    async fn get_24h_volume(&self, symbol: &str) -> Result<f64, EngineError> {
        Ok(self.instrument(symbol, "get_24h_volume").await?.volume_24h)
    }

    async fn get_best_bid_ask(&self, symbol: &str) -> Result<(f64, f64), EngineError> {
        let i = self.instrument(symbol, "get_best_bid_ask").await?;
        Ok((i.best_bid, i.best_ask))
    }

    async fn get_order_book_depth(&self, symbol: &str, _is_spot: bool) -> Result<Vec<BookLevel>, EngineError> {
        let i = self.instrument(symbol, "get_order_book_depth").await?;
        Ok(vec![
            BookLevel { price: i.best_bid, qty: 10.0 },
            BookLevel { price: i.best_ask, qty: 10.0 },
        ])
    }

    async fn get_balance(&self, asset: &str) -> Result<f64, EngineError> {
        Ok(self.balances.read().await.get(asset).copied().unwrap_or(0.0))
    }

    async fn get_tradable_symbols(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.instruments.read().await.keys().cloned().collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, EngineError> {
        request.validate()?;
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let (status, executed_qty, avg_fill_price) = if self.auto_fill {
            let price = if request.price > 0.0 {
                request.price
            } else {
                self.instrument(&request.symbol, "place_order").await?.mark_price
            };
            (OrderStatus::Filled, request.quantity, price)
        } else {
            (OrderStatus::New, 0.0, 0.0)
        };

        let record = OrderRecord {
            order_id: order_id.clone(),
            request: request.clone(),
            status,
            executed_qty,
            avg_fill_price,
            commission: 0.0,
            commission_asset: "USDT".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.orders.write().await.insert(order_id.clone(), record);
        Ok(order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::invalid_request("cancel_order", Some(symbol.to_string()), "unknown order".to_string()))?;
        record.apply_status(OrderStatus::Canceled, chrono::Utc::now().timestamp_millis())?;
        Ok(())
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderRecord, EngineError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::invalid_request("get_order_status", None, "unknown order".to_string()))
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, EngineError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| symbol.is_none_or(|s| s == o.request.symbol))
            .cloned()
            .collect())
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionRecord>, EngineError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: f64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn set_margin_type(&self, _symbol: &str, _mode: MarginType) -> Result<(), EngineError> {
        Ok(())
    }

    async fn subscribe(&self, _symbol: &str, _channels: &[StreamChannel]) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
        let (_tx, rx) = mpsc::channel(16);
        Ok(rx)
    }

    async fn unsubscribe(&self, _symbol: &str, _channels: &[StreamChannel]) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: crate::domain::types::OrderSide::Buy,
            order_type: crate::domain::types::OrderType::Market,
            quantity: 1.0,
            price: 0.0,
            stop_price: 0.0,
            time_in_force: crate::domain::types::TimeInForce::Gtc,
            reduce_only: false,
            close_position: false,
            position_side: crate::domain::types::PositionSide::Both,
            margin_type: MarginType::Cross,
            is_spot: false,
            extra_params: Default::default(),
        }
    }

    #[tokio::test]
    async fn place_order_auto_fills_at_mark_price() {
        let adapter = MockExchangeAdapter::new();
        adapter
            .set_instrument(
                "BTC/USDT",
                MockInstrument {
                    spot_price: 50000.0,
                    mark_price: 50010.0,
                    funding_rate: 0.0001,
                    next_funding_time: 0,
                    volume_24h: 1.0e7,
                    best_bid: 49999.0,
                    best_ask: 50001.0,
                },
            )
            .await;

        let order_id = adapter.place_order(&sample_request("BTC/USDT")).await.unwrap();
        let record = adapter.get_order_status("BTC/USDT", &order_id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert!((record.avg_fill_price - 50010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancel_order_transitions_to_canceled() {
        let adapter = MockExchangeAdapter { auto_fill: false, ..MockExchangeAdapter::new() };
        adapter
            .set_instrument(
                "BTC/USDT",
                MockInstrument {
                    spot_price: 50000.0,
                    mark_price: 50010.0,
                    funding_rate: 0.0001,
                    next_funding_time: 0,
                    volume_24h: 1.0e7,
                    best_bid: 49999.0,
                    best_ask: 50001.0,
                },
            )
            .await;
        let order_id = adapter.place_order(&sample_request("BTC/USDT")).await.unwrap();
        adapter.cancel_order("BTC/USDT", &order_id).await.unwrap();
        let record = adapter.get_order_status("BTC/USDT", &order_id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_instrument_is_invalid_request() {
        let adapter = MockExchangeAdapter::new();
        assert!(adapter.get_funding_rate("BTC/USDT").await.is_err());
    }
}
