//! Active-order index owned exclusively behind `orders_mutex` in the lock order
//! (`state` -> `positions` -> `orders` -> `metrics`, §5). Terminal orders are evicted
//! immediately (data model §3).
//!
//! Grounded on the teacher's `application/risk_management/order_monitor.rs`
//! (`RwLock<HashMap<String, MonitoredOrder>>`, `track_order`/`on_order_filled`-style
//! eviction), generalized from limit-order-retry tracking to the full order lifecycle
//! the funding arbitrage engine drives (place, poll, cancel, fill).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::errors::EngineError;
use crate::domain::ports::ExchangeAdapter;
use crate::domain::types::{OrderRecord, OrderRequest, OrderSide, OrderStatus, OrderType};

/// Default deviation applied by `slippage_price` when a request carries no better
/// reference, matching `max_slippage`'s own default (spec.md §4.3).
const DEFAULT_SLIPPAGE: f64 = 0.001;

pub struct OrderManager {
    active_orders: Arc<RwLock<HashMap<String, OrderRecord>>>,
    adapter: Arc<dyn ExchangeAdapter>,
    max_slippage: f64,
    use_post_only: bool,
}

impl OrderManager {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self::with_slippage_policy(adapter, DEFAULT_SLIPPAGE, false)
    }

    pub fn with_slippage_policy(adapter: Arc<dyn ExchangeAdapter>, max_slippage: f64, use_post_only: bool) -> Self {
        Self { active_orders: Arc::new(RwLock::new(HashMap::new())), adapter, max_slippage, use_post_only }
    }

    /// Computes the slippage-adjusted reference price for a non-market order and
    /// promotes LIMIT to POST_ONLY when the policy calls for it (spec.md §4.3).
    fn adjust_for_slippage(&self, mut request: OrderRequest) -> OrderRequest {
        if request.order_type == OrderType::Market || request.price <= 0.0 {
            return request;
        }
        request.price = match request.side {
            OrderSide::Buy => request.price * (1.0 + self.max_slippage),
            OrderSide::Sell => request.price * (1.0 - self.max_slippage),
        };
        if self.use_post_only && request.order_type == OrderType::Limit {
            request.order_type = OrderType::PostOnly;
        }
        request
    }

    pub async fn place(&self, request: OrderRequest) -> Result<OrderRecord, EngineError> {
        let request = self.adjust_for_slippage(request);
        let order_id = self.adapter.place_order(&request).await?;
        let record = self.adapter.get_order_status(&request.symbol, &order_id).await?;
        self.track(record.clone()).await;
        Ok(record)
    }

    pub async fn cancel(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        self.adapter.cancel_order(symbol, order_id).await?;
        self.evict(order_id).await;
        Ok(())
    }

    /// Returns the cached record if tracked, otherwise queries the Exchange Adapter
    /// directly (spec.md §4.3).
    pub async fn status(&self, symbol: &str, order_id: &str) -> Result<OrderRecord, EngineError> {
        if let Some(record) = self.active_orders.read().await.get(order_id).cloned() {
            return Ok(record);
        }
        self.adapter.get_order_status(symbol, order_id).await
    }

    /// Polls until the order reaches FILLED or any other terminal status, or `timeout`
    /// elapses, whichever comes first (spec.md §4.3, §5 "Order-wait threads").
    pub async fn wait_for_fill(&self, symbol: &str, order_id: &str, timeout: Duration) -> Result<OrderRecord, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.adapter.get_order_status(symbol, order_id).await?;
            if record.status.is_terminal() {
                self.track(record.clone()).await;
                return Ok(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(200).min(deadline.saturating_duration_since(tokio::time::Instant::now()))).await;
        }
    }

    /// Polls every tracked order's status and updates the index, evicting terminal ones.
    pub async fn refresh(&self) -> Result<Vec<OrderRecord>, EngineError> {
        let tracked: Vec<(String, String)> = {
            let orders = self.active_orders.read().await;
            orders.values().map(|o| (o.request.symbol.clone(), o.order_id.clone())).collect()
        };

        let mut updated = Vec::with_capacity(tracked.len());
        for (symbol, order_id) in tracked {
            match self.adapter.get_order_status(&symbol, &order_id).await {
                Ok(record) => {
                    if record.is_terminal_ok() {
                        self.evict(&order_id).await;
                    } else {
                        self.track(record.clone()).await;
                    }
                    updated.push(record);
                }
                Err(e) => warn!(symbol, order_id, error = %e, "failed to refresh order status"),
            }
        }
        Ok(updated)
    }

    async fn track(&self, record: OrderRecord) {
        if record.status.is_terminal() {
            self.evict(&record.order_id).await;
            return;
        }
        self.active_orders.write().await.insert(record.order_id.clone(), record);
    }

    async fn evict(&self, order_id: &str) {
        if self.active_orders.write().await.remove(order_id).is_some() {
            info!(order_id, "order evicted from active index");
        }
    }

    pub async fn active_for_symbol(&self, symbol: &str) -> Vec<OrderRecord> {
        self.active_orders.read().await.values().filter(|o| o.request.symbol == symbol).cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active_orders.read().await.len()
    }

    /// Cancels every order still tracked for a symbol; idempotent if none remain.
    pub async fn cancel_all_for_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let order_ids: Vec<String> = self.active_for_symbol(symbol).await.into_iter().map(|o| o.order_id).collect();
        for order_id in order_ids {
            self.cancel(symbol, &order_id).await?;
        }
        Ok(())
    }
}

trait TerminalOk {
    fn is_terminal_ok(&self) -> bool;
}

impl TerminalOk for OrderRecord {
    fn is_terminal_ok(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MarginType, OrderSide, OrderType, PositionSide, TimeInForce};
    use crate::infrastructure::mock::{MockExchangeAdapter, MockInstrument};

    fn sample_request() -> OrderRequest {
        OrderRequest {
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 1.0,
            price: 0.0,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: MarginType::Cross,
            is_spot: false,
            extra_params: Default::default(),
        }
    }

    async fn manager_with_instrument() -> (OrderManager, Arc<MockExchangeAdapter>) {
        let adapter = Arc::new(MockExchangeAdapter::new());
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
        (OrderManager::new(adapter.clone()), adapter)
    }

    #[tokio::test]
    async fn filled_order_never_enters_active_index() {
        let (manager, _adapter) = manager_with_instrument().await;
        let record = manager.place(sample_request()).await.unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn pending_order_tracked_until_refresh_sees_terminal_status() {
        let mut pending = sample_request();
        pending.order_type = OrderType::Limit;
        pending.price = 50000.0;

        let adapter_no_fill = Arc::new(MockExchangeAdapter { auto_fill: false, ..MockExchangeAdapter::new() });
        adapter_no_fill
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
        let manager = OrderManager::new(adapter_no_fill.clone());
        let record = manager.place(pending).await.unwrap();
        assert_eq!(record.status, OrderStatus::New);
        assert_eq!(manager.active_count().await, 1);

        manager.cancel("BTC/USDT", &record.order_id).await.unwrap();
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_all_for_symbol_is_idempotent_when_empty() {
        let (manager, _adapter) = manager_with_instrument().await;
        manager.cancel_all_for_symbol("BTC/USDT").await.unwrap();
        manager.cancel_all_for_symbol("BTC/USDT").await.unwrap();
    }

    #[tokio::test]
    async fn limit_buy_price_is_adjusted_up_by_max_slippage() {
        let (_manager, adapter) = manager_with_instrument().await;
        let manager = OrderManager::with_slippage_policy(adapter, 0.01, false);
        let mut request = sample_request();
        request.order_type = OrderType::Limit;
        request.price = 100.0;
        let record = manager.place(request).await.unwrap();
        assert!((record.avg_fill_price - 101.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn limit_sell_price_is_adjusted_down_by_max_slippage() {
        let (_manager, adapter) = manager_with_instrument().await;
        let manager = OrderManager::with_slippage_policy(adapter, 0.01, false);
        let mut request = sample_request();
        request.side = OrderSide::Sell;
        request.order_type = OrderType::Limit;
        request.price = 100.0;
        let record = manager.place(request).await.unwrap();
        assert!((record.avg_fill_price - 99.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn limit_order_promotes_to_post_only_when_policy_enables_it() {
        let (_manager, adapter) = manager_with_instrument().await;
        let manager = OrderManager::with_slippage_policy(adapter, 0.01, true);
        let mut request = sample_request();
        request.order_type = OrderType::Limit;
        request.price = 100.0;
        let record = manager.place(request).await.unwrap();
        assert_eq!(record.request.order_type, OrderType::PostOnly);
    }

    #[tokio::test]
    async fn market_orders_are_never_slippage_adjusted() {
        let (_manager, adapter) = manager_with_instrument().await;
        let manager = OrderManager::with_slippage_policy(adapter, 0.01, true);
        let record = manager.place(sample_request()).await.unwrap();
        assert_eq!(record.request.order_type, OrderType::Market);
        assert!((record.avg_fill_price - 50010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_falls_back_to_adapter_query_once_untracked() {
        let (manager, _adapter) = manager_with_instrument().await;
        let record = manager.place(sample_request()).await.unwrap();
        let status = manager.status("BTC/USDT", &record.order_id).await.unwrap();
        assert_eq!(status.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn wait_for_fill_resolves_immediately_once_already_terminal() {
        let (manager, _adapter) = manager_with_instrument().await;
        let record = manager.place(sample_request()).await.unwrap();
        let status = manager.wait_for_fill("BTC/USDT", &record.order_id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(status.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn wait_for_fill_times_out_on_an_order_stuck_new() {
        let adapter_no_fill = Arc::new(MockExchangeAdapter { auto_fill: false, ..MockExchangeAdapter::new() });
        adapter_no_fill
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
        let manager = OrderManager::new(adapter_no_fill);
        let mut pending = sample_request();
        pending.order_type = OrderType::Limit;
        pending.price = 50000.0;
        let record = manager.place(pending).await.unwrap();
        let status = manager.wait_for_fill("BTC/USDT", &record.order_id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(status.status, OrderStatus::New);
    }
}
