//! Position/pair index owned exclusively behind `positions_mutex` (lock order §5, ahead
//! of `orders_mutex`). Tracks one `PairState` and at most two `PositionRecord`s (spot +
//! futures leg) per active arbitrage symbol.
//!
//! Grounded on the teacher's `application/risk_management/position_manager.rs` (a
//! struct owning per-symbol trading state with small, focused mutation methods),
//! generalized from a single-leg `trailing_stop`/`pending_order` model to the
//! pair-of-legs + imbalance model spec.md §4.6 describes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::application::order_manager::OrderManager;
use crate::domain::errors::EngineError;
use crate::domain::pair::PairState;
use crate::domain::ports::ExchangeAdapter;
use crate::domain::position::PositionRecord;
use crate::domain::types::{MarginType, OrderRecord, OrderRequest, OrderSide, OrderType, PositionSide, TimeInForce};

/// How a single-symbol `open` should be placed; `options::default()` places a plain
/// cross-margined market order on the futures surface.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub order_type: OrderType,
    pub price: f64,
    pub margin_type: MarginType,
    pub is_spot: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { order_type: OrderType::Market, price: 0.0, margin_type: MarginType::Cross, is_spot: false }
    }
}

pub struct PositionManager {
    pairs: Arc<RwLock<HashMap<String, PairState>>>,
    positions: Arc<RwLock<HashMap<String, PositionRecord>>>,
    orders: Arc<OrderManager>,
    adapter: Arc<dyn ExchangeAdapter>,
}

impl PositionManager {
    pub fn new(orders: Arc<OrderManager>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            pairs: Arc::new(RwLock::new(HashMap::new())),
            positions: Arc::new(RwLock::new(HashMap::new())),
            orders,
            adapter,
        }
    }

    /// Places a single-symbol position via the Order Manager (spec.md §4.4). Distinct
    /// from `open_pair`, which only records bookkeeping for a pair the Strategy Engine
    /// has already executed both legs of.
    pub async fn open(&self, symbol: &str, size: f64, side: OrderSide, options: OpenOptions) -> Result<OrderRecord, EngineError> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: options.order_type,
            quantity: size.abs(),
            price: options.price,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: options.margin_type,
            is_spot: options.is_spot,
            extra_params: Default::default(),
        };
        self.orders.place(request).await
    }

    /// Issues a reduce-only order for the current absolute size and drops the tracked
    /// Position Record; a no-op if nothing is tracked (spec.md §4.4).
    pub async fn close(&self, symbol: &str) -> Result<Option<OrderRecord>, EngineError> {
        let Some(position) = self.position(symbol).await else { return Ok(None) };
        if position.size == 0.0 {
            return Ok(None);
        }
        let side = if position.size > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: position.size.abs(),
            price: 0.0,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only: true,
            close_position: true,
            position_side: PositionSide::Both,
            margin_type: position.margin_type,
            is_spot: false,
            extra_params: Default::default(),
        };
        let record = self.orders.place(request).await?;
        self.positions.write().await.remove(symbol);
        Ok(Some(record))
    }

    /// Places a reduce-only or increase order for |target - current| on the side that
    /// moves the position toward `target_size` (spec.md §4.4).
    pub async fn adjust(&self, symbol: &str, target_size: f64) -> Result<Option<OrderRecord>, EngineError> {
        let current = self.position(symbol).await.map(|p| p.size).unwrap_or(0.0);
        let delta = target_size - current;
        if delta.abs() < 1e-12 {
            return Ok(None);
        }
        let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        let reduce_only = target_size.abs() < current.abs();
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: delta.abs(),
            price: 0.0,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: MarginType::Cross,
            is_spot: false,
            extra_params: Default::default(),
        };
        Ok(Some(self.orders.place(request).await?))
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<(), EngineError> {
        self.adapter.set_leverage(symbol, leverage).await
    }

    pub async fn open_pair(&self, pair: PairState) {
        info!(symbol = %pair.symbol, "opened funding arbitrage pair");
        self.pairs.write().await.insert(pair.symbol.clone(), pair);
    }

    pub async fn close_pair(&self, symbol: &str) {
        if self.pairs.write().await.remove(symbol).is_some() {
            info!(symbol, "closed funding arbitrage pair");
        }
        self.positions.write().await.remove(symbol);
    }

    pub async fn pair(&self, symbol: &str) -> Option<PairState> {
        self.pairs.read().await.get(symbol).cloned()
    }

    pub async fn all_pairs(&self) -> Vec<PairState> {
        self.pairs.read().await.values().cloned().collect()
    }

    pub async fn update_position(&self, position: PositionRecord) {
        self.positions.write().await.insert(position.symbol.clone(), position);
    }

    pub async fn position(&self, symbol: &str) -> Option<PositionRecord> {
        self.positions.read().await.get(symbol).cloned()
    }

    pub async fn all_positions(&self) -> Vec<PositionRecord> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn total_exposure(&self) -> f64 {
        self.positions.read().await.values().map(|p| p.size.abs() * p.mark_price).sum()
    }

    /// Adjusts the pair's recorded leg sizes after a rebalancing trade (spec.md §4.6).
    pub async fn rebalance(&self, symbol: &str, spot_delta: f64, futures_delta: f64) {
        let mut pairs = self.pairs.write().await;
        if let Some(pair) = pairs.get_mut(symbol) {
            pair.spot_size += spot_delta;
            pair.futures_size += futures_delta;
        }
    }

    /// Idempotent: a symbol with no tracked pair is a no-op, matching `close_pair`.
    pub async fn close_all(&self) {
        let symbols: Vec<String> = self.pairs.read().await.keys().cloned().collect();
        for symbol in symbols {
            self.close_pair(&symbol).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MarginType;
    use crate::infrastructure::mock::{MockExchangeAdapter, MockInstrument};

    fn sample_pair(symbol: &str) -> PairState {
        PairState {
            symbol: symbol.to_string(),
            spot_size: 0.01,
            futures_size: -0.01,
            entry_basis: 0.001,
            opened_at: 0,
            target_funding_time: 1000,
        }
    }

    fn sample_position(symbol: &str, size: f64) -> PositionRecord {
        PositionRecord {
            symbol: symbol.to_string(),
            size,
            entry_price: 50000.0,
            mark_price: 50010.0,
            liquidation_price: if size > 0.0 { 40000.0 } else { 60000.0 },
            margin: 500.0,
            leverage: 5.0,
            margin_type: MarginType::Cross,
            updated_at: 0,
        }
    }

    async fn manager_with_instrument(symbol: &str) -> (PositionManager, Arc<MockExchangeAdapter>) {
        let adapter = Arc::new(MockExchangeAdapter::new());
        adapter
            .set_instrument(
                symbol,
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
        let orders = Arc::new(OrderManager::new(adapter.clone()));
        (PositionManager::new(orders, adapter.clone()), adapter)
    }

    #[tokio::test]
    async fn rebalance_adjusts_leg_sizes() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.open_pair(sample_pair("BTC/USDT")).await;
        manager.rebalance("BTC/USDT", 0.0, -0.003).await;
        let pair = manager.pair("BTC/USDT").await.unwrap();
        assert!((pair.imbalance() - 0.013).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_all_is_idempotent() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.open_pair(sample_pair("BTC/USDT")).await;
        manager.update_position(sample_position("BTC/USDT", 0.01)).await;
        manager.close_all().await;
        manager.close_all().await;
        assert!(manager.all_pairs().await.is_empty());
        assert!(manager.position("BTC/USDT").await.is_none());
    }

    #[tokio::test]
    async fn total_exposure_sums_notional_across_positions() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.update_position(sample_position("BTC/USDT", 0.01)).await;
        manager.update_position(sample_position("ETH/USDT", -0.1)).await;
        let total = manager.total_exposure().await;
        assert!(total > 0.0);
    }

    #[tokio::test]
    async fn open_delegates_to_the_order_manager() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        let record = manager.open("BTC/USDT", 0.01, OrderSide::Buy, OpenOptions::default()).await.unwrap();
        assert_eq!(record.status, crate::domain::types::OrderStatus::Filled);
        assert!((record.executed_qty - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_places_a_reduce_only_order_and_drops_the_record() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.update_position(sample_position("BTC/USDT", 0.01)).await;
        let record = manager.close("BTC/USDT").await.unwrap().expect("a reduce-only order should be placed");
        assert!(record.request.reduce_only);
        assert_eq!(record.request.side, OrderSide::Sell);
        assert!(manager.position("BTC/USDT").await.is_none());
    }

    #[tokio::test]
    async fn close_on_an_untracked_symbol_is_a_no_op() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        assert!(manager.close("BTC/USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adjust_places_an_increase_order_for_the_delta() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.update_position(sample_position("BTC/USDT", 0.01)).await;
        let record = manager.adjust("BTC/USDT", 0.03).await.unwrap().expect("delta is non-zero");
        assert!(!record.request.reduce_only);
        assert_eq!(record.request.side, OrderSide::Buy);
        assert!((record.request.quantity - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn adjust_places_a_reduce_only_order_when_shrinking() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.update_position(sample_position("BTC/USDT", 0.03)).await;
        let record = manager.adjust("BTC/USDT", 0.01).await.unwrap().expect("delta is non-zero");
        assert!(record.request.reduce_only);
        assert_eq!(record.request.side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn adjust_is_a_no_op_when_already_at_target() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.update_position(sample_position("BTC/USDT", 0.01)).await;
        assert!(manager.adjust("BTC/USDT", 0.01).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_leverage_delegates_to_the_adapter() {
        let (manager, _adapter) = manager_with_instrument("BTC/USDT").await;
        manager.set_leverage("BTC/USDT", 10.0).await.unwrap();
    }
}
