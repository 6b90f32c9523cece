//! The control loop: instrument selection, pre-funding window detection, pair-trade
//! execution, rebalancing, and position monitoring (spec.md §4.5, §4.6).
//!
//! Exclusively owns Pair State behind `state_mutex`, first in the lock order (§5):
//! `state_mutex` -> `positions_mutex` -> `orders_mutex` -> `metrics_mutex`. Grounded on
//! the teacher's `application/risk_management/sizing_engine.rs` (an engine struct
//! wired to its dependencies by constructor injection, one focused method per
//! concern) and `application/system/Application`'s tick-loop shape, generalized from
//! a general trading-strategy dispatch to the funding-arbitrage pair lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::application::alerts::AlertSink;
use crate::application::market_data_cache::MarketDataCache;
use crate::application::order_manager::OrderManager;
use crate::application::position_manager::PositionManager;
use crate::application::risk_controller::{RiskController, ValidationContext};
use crate::config::FundingArbitrageConfig;
use crate::domain::errors::EngineError;
use crate::domain::pair::PairState;
use crate::domain::ports::ExchangeAdapter;
use crate::domain::types::{
    InstrumentSnapshot, MarginType, OrderRequest, OrderSide, OrderType, PositionSide, TimeInForce,
};

/// What the engine decided to do with a candidate instrument, surfaced mainly for tests.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Traded { spot_qty: f64, futures_qty: f64 },
    Rejected(String),
}

pub struct StrategyEngine {
    adapter: Arc<dyn ExchangeAdapter>,
    cache: Arc<MarketDataCache>,
    orders: Arc<OrderManager>,
    positions: Arc<PositionManager>,
    risk: Arc<RiskController>,
    alerts: Arc<dyn AlertSink>,
    config: FundingArbitrageConfig,
    total_equity: Arc<RwLock<f64>>,
    stopping: Arc<AtomicBool>,
}

impl StrategyEngine {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        cache: Arc<MarketDataCache>,
        orders: Arc<OrderManager>,
        positions: Arc<PositionManager>,
        risk: Arc<RiskController>,
        alerts: Arc<dyn AlertSink>,
        config: FundingArbitrageConfig,
        total_equity: f64,
    ) -> Self {
        Self {
            adapter,
            cache,
            orders,
            positions,
            risk,
            alerts,
            config,
            total_equity: Arc::new(RwLock::new(total_equity)),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub async fn set_total_equity(&self, equity: f64) {
        *self.total_equity.write().await = equity;
    }

    /// Runs the control loop until `request_stop` is called. Each tick's errors are
    /// logged and the loop backs off rather than terminating (spec.md §4.5), except
    /// for INVARIANT errors which stop the loop after an orderly close-all attempt.
    pub async fn run(&self) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                info!("strategy engine stopping: closing all positions");
                let _ = self.close_all_positions().await;
                return;
            }

            match self.tick(now_unix()).await {
                Ok(()) => {
                    tokio::time::sleep(std::time::Duration::from_secs(self.config.tick_interval_seconds)).await;
                }
                Err(e) if e.is_invariant() => {
                    warn!(error = %e, "invariant violated, shutting down control loop");
                    let _ = self.close_all_positions().await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "tick failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(self.config.tick_error_backoff_seconds)).await;
                }
            }
        }
    }

    /// One control-loop iteration (spec.md §4.5 step 1-3). `now` is passed in so tests
    /// can drive deterministic window/monitoring decisions.
    pub async fn tick(&self, now: i64) -> Result<(), EngineError> {
        self.refresh_positions(now).await?;
        let snapshots = self.refresh_snapshots().await?;

        let in_window = snapshots.iter().any(|s| self.in_pre_funding_window(s, now));
        if in_window {
            let candidates = self.select_candidates(&snapshots);
            for snapshot in candidates {
                if !self.in_pre_funding_window(&snapshot, now) {
                    continue;
                }
                match self.evaluate_and_trade(&snapshot, now).await {
                    Ok(CandidateOutcome::Traded { spot_qty, futures_qty }) => {
                        info!(symbol = %snapshot.symbol, spot_qty, futures_qty, "pair trade executed");
                    }
                    Ok(CandidateOutcome::Rejected(reason)) => {
                        debug!(symbol = %snapshot.symbol, reason, "candidate rejected");
                    }
                    Err(e) => warn!(symbol = %snapshot.symbol, error = %e, "pair trade execution failed"),
                }
            }
        } else {
            self.monitor_open_pairs(now).await?;
        }

        Ok(())
    }

    async fn refresh_snapshots(&self) -> Result<Vec<InstrumentSnapshot>, EngineError> {
        let symbols = self.adapter.get_tradable_symbols().await?;
        let mut snapshots = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let snapshot = self.build_snapshot(&symbol).await?;
            self.cache.update(snapshot.clone()).await;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    async fn build_snapshot(&self, symbol: &str) -> Result<InstrumentSnapshot, EngineError> {
        let spot_price = self.adapter.get_spot_price(symbol).await?;
        let futures_price = self.adapter.get_mark_price(symbol).await?;
        let funding_rate = self.adapter.get_funding_rate(symbol).await?;
        let next_funding_time = self.adapter.get_next_funding_time(symbol).await?;
        let volume_24h = self.adapter.get_24h_volume(symbol).await?;
        let (best_bid, best_ask) = self.adapter.get_best_bid_ask(symbol).await?;

        Ok(InstrumentSnapshot {
            symbol: symbol.to_string(),
            spot_price,
            futures_price,
            funding_rate,
            next_funding_time,
            volume_24h,
            best_bid,
            best_ask,
        })
    }

    /// Stable tie-break by symbol after sorting descending by |funding_rate|.
    pub fn select_candidates(&self, snapshots: &[InstrumentSnapshot]) -> Vec<InstrumentSnapshot> {
        let mut ranked: Vec<InstrumentSnapshot> = snapshots.to_vec();
        ranked.sort_by(|a, b| {
            b.funding_rate
                .abs()
                .partial_cmp(&a.funding_rate.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked.truncate(self.config.top_n_instruments);
        ranked
    }

    pub fn in_pre_funding_window(&self, snapshot: &InstrumentSnapshot, now: i64) -> bool {
        let seconds_to_funding = snapshot.seconds_to_funding(now);
        let window_seconds = self.config.pre_funding_minutes * 60;
        seconds_to_funding > 0 && seconds_to_funding <= window_seconds
    }

    /// Conjunctive validation (spec.md §4.5). Returns the rejection reason on first
    /// failing check.
    pub async fn validate_instrument(&self, snapshot: &InstrumentSnapshot) -> Result<(), String> {
        if snapshot.funding_rate.abs() < self.config.min_funding_rate {
            return Err(format!("funding_rate {} below minimum {}", snapshot.funding_rate, self.config.min_funding_rate));
        }
        if snapshot.basis().abs() < self.config.min_basis_ratio {
            return Err(format!("basis {} below minimum {}", snapshot.basis(), self.config.min_basis_ratio));
        }
        if snapshot.spot_price <= 0.0 {
            return Err("spot price must be positive".to_string());
        }
        let spread_ratio = snapshot.spread() / snapshot.spot_price;
        if spread_ratio > self.config.max_spread_ratio {
            return Err(format!("spread ratio {spread_ratio} exceeds maximum {}", self.config.max_spread_ratio));
        }
        if snapshot.volume_24h * snapshot.spot_price < self.config.min_volume_usd {
            return Err("24h volume below minimum notional".to_string());
        }

        let target_notional = 3.0 * self.config.position_size_usd;
        let spot_depth = self.depth_notional(&snapshot.symbol, true, target_notional).await;
        let futures_depth = self.depth_notional(&snapshot.symbol, false, target_notional).await;
        if spot_depth < target_notional || futures_depth < target_notional {
            return Err("insufficient liquidity depth on spot or futures book".to_string());
        }

        Ok(())
    }

    /// Sums top-of-book notional on the requested side until it reaches `target_notional`
    /// or the book is exhausted, returning whichever is smaller.
    async fn depth_notional(&self, symbol: &str, is_spot: bool, target_notional: f64) -> f64 {
        match self.adapter.get_order_book_depth(symbol, is_spot).await {
            Ok(levels) => {
                let mut sum = 0.0;
                for level in levels {
                    sum += level.price * level.qty;
                    if sum >= target_notional {
                        break;
                    }
                }
                sum
            }
            Err(e) => {
                warn!(symbol, error = %e, "failed to fetch order book depth");
                0.0
            }
        }
    }

    /// Base size from configured USD notional, clamped to liquidity and per-symbol caps
    /// (spec.md §4.5 "Sizing"). Returns 0.0 if the result falls below the minimum
    /// notional after halving for market impact.
    pub async fn size_position(&self, snapshot: &InstrumentSnapshot) -> f64 {
        const MIN_NOTIONAL_USD: f64 = 100.0;

        let total_equity = *self.total_equity.read().await;
        let base_qty = self.config.position_size_usd / snapshot.spot_price;
        let symbol_cap_qty = self.config.max_position_per_symbol * total_equity / snapshot.spot_price;
        let mut qty = base_qty.min(symbol_cap_qty);

        let mean_recent_trade_qty = self.estimate_mean_recent_trade_size(snapshot);
        let impact_cap = 3.0 * mean_recent_trade_qty;

        while qty > impact_cap && qty >= base_qty * 0.1 {
            qty /= 2.0;
        }
        if qty > impact_cap || qty * snapshot.spot_price < MIN_NOTIONAL_USD {
            return 0.0;
        }
        qty
    }

    /// No trade-tape feed is wired into the Exchange Adapter surface (spec.md §4.2 does
    /// not expose one); approximate recent trade size from 24h volume spread evenly
    /// across the configured lookback window, the same order-of-magnitude proxy used
    /// when a tape isn't available.
    fn estimate_mean_recent_trade_size(&self, snapshot: &InstrumentSnapshot) -> f64 {
        let minutes = self.config.min_market_impact_minutes.max(1) as f64;
        let share_of_day = minutes / (24.0 * 60.0);
        (snapshot.volume_24h * share_of_day).max(1e-9)
    }

    async fn evaluate_and_trade(&self, snapshot: &InstrumentSnapshot, now: i64) -> Result<CandidateOutcome, EngineError> {
        if let Err(reason) = self.validate_instrument(snapshot).await {
            return Ok(CandidateOutcome::Rejected(reason));
        }

        let size = self.size_position(snapshot).await;
        if size <= 0.0 {
            return Ok(CandidateOutcome::Rejected("sized to zero after market-impact halving".to_string()));
        }

        let estimated_profit = snapshot.basis().abs() * size * snapshot.spot_price;
        let total_fees = 2.0 * self.config.trading_fee * size * snapshot.spot_price;
        if estimated_profit <= total_fees {
            return Ok(CandidateOutcome::Rejected(format!(
                "estimated profit {estimated_profit} does not exceed fees {total_fees}"
            )));
        }

        let tracked_position = self.positions.position(&snapshot.symbol).await;
        let existing_symbol_exposure = tracked_position.as_ref().map(|p| p.size.abs() * p.mark_price).unwrap_or(0.0);
        let total_exposure = self.positions.total_exposure().await;
        let metrics = self.risk.metrics().await;

        let leverage = tracked_position.as_ref().map(|p| p.leverage).unwrap_or(1.0).max(1.0);
        let notional = size * snapshot.spot_price;
        let required_margin = notional / leverage;
        let available_balance = *self.total_equity.read().await;
        let recent_volatility = self.cache.volatility(&snapshot.symbol).await;

        let request = OrderRequest {
            symbol: snapshot.symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: size,
            price: 0.0,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: MarginType::Cross,
            is_spot: true,
            extra_params: Default::default(),
        };

        let context = ValidationContext {
            request: &request,
            candidate_basis: snapshot.basis(),
            candidate_funding_rate: snapshot.funding_rate,
            candidate_size: size,
            required_margin,
            available_balance,
            recent_volatility,
            existing_symbol_exposure,
            total_exposure,
            trades_last_hour: metrics.trade_count_last_hour,
            metrics: &metrics,
            limits: self.risk.limits(),
            min_basis_ratio: self.config.min_basis_ratio,
            min_funding_rate: self.config.min_funding_rate,
        };

        let approval = self.risk.validate(&context).await;
        if !approval.is_approved() {
            return Ok(CandidateOutcome::Rejected(format!("{approval:?}")));
        }

        let (spot_side, futures_side) = if snapshot.futures_price > snapshot.spot_price {
            (OrderSide::Buy, OrderSide::Sell)
        } else {
            (OrderSide::Sell, OrderSide::Buy)
        };

        let (spot_filled, futures_filled) = self.execute_pair_legs(&snapshot.symbol, spot_side, futures_side, size).await?;

        let pair = PairState {
            symbol: snapshot.symbol.clone(),
            spot_size: signed(spot_side, spot_filled),
            futures_size: signed(futures_side, futures_filled),
            entry_basis: snapshot.basis(),
            opened_at: now,
            target_funding_time: snapshot.next_funding_time,
        };
        self.positions.open_pair(pair.clone()).await;
        self.rebalance_if_needed(&pair).await?;

        Ok(CandidateOutcome::Traded { spot_qty: spot_filled, futures_qty: futures_filled })
    }

    /// Places both legs, TWAP-sliced if enabled, concurrently (spec.md §4.5). A shared
    /// cancellation flag lets either leg stop placing further slices the instant the
    /// other times out on one, so the two legs never drift further out of sync than a
    /// single slice.
    async fn execute_pair_legs(
        &self,
        symbol: &str,
        spot_side: OrderSide,
        futures_side: OrderSide,
        size: f64,
    ) -> Result<(f64, f64), EngineError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (spot_qty, futures_qty) = tokio::join!(
            self.execute_leg(symbol, spot_side, size, true, cancelled.clone()),
            self.execute_leg(symbol, futures_side, size, false, cancelled.clone())
        );
        Ok((spot_qty?, futures_qty?))
    }

    /// Places each TWAP slice and waits for it to fill within
    /// `execution_timeout_seconds` (spec.md §4.5). A slice that times out is cancelled,
    /// `cancelled` is raised so the other leg stops placing further slices too, and the
    /// remaining slices on this leg are skipped; the caller's `rebalance_if_needed` then
    /// resolves whatever imbalance the partial fill left behind.
    async fn execute_leg(
        &self,
        symbol: &str,
        side: OrderSide,
        size: f64,
        is_spot: bool,
        cancelled: Arc<AtomicBool>,
    ) -> Result<f64, EngineError> {
        let slices: u32 = if self.config.use_twap { self.config.twap_intervals.max(1) } else { 1 };
        let slice_qty = size / slices as f64;
        let mut filled = 0.0;
        let slice_timeout = std::time::Duration::from_secs(self.config.execution_timeout_seconds);

        for i in 0..slices {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }

            let request = OrderRequest {
                symbol: symbol.to_string(),
                side,
                order_type: OrderType::Market,
                quantity: slice_qty,
                price: 0.0,
                stop_price: 0.0,
                time_in_force: TimeInForce::Gtc,
                reduce_only: false,
                close_position: false,
                position_side: PositionSide::Both,
                margin_type: MarginType::Cross,
                is_spot,
                extra_params: Default::default(),
            };
            let record = self.orders.place(request).await?;
            let record = if record.status.is_terminal() {
                record
            } else {
                self.orders.wait_for_fill(symbol, &record.order_id, slice_timeout).await?
            };
            filled += record.executed_qty;

            if !record.status.is_terminal() {
                cancelled.store(true, Ordering::SeqCst);
                warn!(symbol, is_spot, order_id = %record.order_id, "slice execution timed out, cancelling remaining slices on both legs");
                let _ = self.orders.cancel(symbol, &record.order_id).await;
                break;
            }

            if i + 1 < slices {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
        Ok(filled)
    }

    /// Post-trade rebalancing (spec.md §4.6): issues a reduce/increase order for half
    /// the imbalance on the over-weighted leg so legs net within tolerance.
    async fn rebalance_if_needed(&self, pair: &PairState) -> Result<(), EngineError> {
        let imbalance = pair.imbalance();
        if imbalance <= self.config.position_imbalance_tolerance {
            return Ok(());
        }

        let half = imbalance / 2.0;
        let (side, is_spot, spot_delta, futures_delta) = if pair.spot_size.abs() > pair.futures_size.abs() {
            (if pair.spot_size > 0.0 { OrderSide::Sell } else { OrderSide::Buy }, true, -pair.spot_size.signum() * half, 0.0)
        } else {
            (if pair.futures_size > 0.0 { OrderSide::Sell } else { OrderSide::Buy }, false, 0.0, -pair.futures_size.signum() * half)
        };

        let request = OrderRequest {
            symbol: pair.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity: half,
            price: 0.0,
            stop_price: 0.0,
            time_in_force: TimeInForce::Gtc,
            reduce_only: true,
            close_position: false,
            position_side: PositionSide::Both,
            margin_type: MarginType::Cross,
            is_spot,
            extra_params: Default::default(),
        };
        self.orders.place(request).await?;
        self.positions.rebalance(&pair.symbol, spot_delta, futures_delta).await;
        Ok(())
    }

    /// Monitors open pairs when out of window: close on funding-time passage,
    /// profit-take, or stop-loss (spec.md §4.5 "Position monitoring").
    async fn monitor_open_pairs(&self, now: i64) -> Result<(), EngineError> {
        for pair in self.positions.all_pairs().await {
            let should_close = now > pair.target_funding_time || {
                let pnl_ratio = self.unrealized_pnl_ratio(&pair).await;
                pnl_ratio >= self.config.profit_take_ratio || pnl_ratio <= -self.config.stop_loss_ratio
            };

            if should_close {
                self.close_pair(&pair.symbol).await?;
            }
        }
        Ok(())
    }

    async fn unrealized_pnl_ratio(&self, pair: &PairState) -> f64 {
        let position = self.positions.position(&pair.symbol).await;
        let pnl: f64 = position.map(|p| p.unrealized_pnl()).unwrap_or(0.0);
        if self.config.position_size_usd > 0.0 {
            pnl / self.config.position_size_usd
        } else {
            0.0
        }
    }

    /// Closes both legs with reduce-only orders sized to the current absolute leg
    /// size, then removes the Pair State entry (spec.md §4.5 "Closing").
    pub async fn close_pair(&self, symbol: &str) -> Result<(), EngineError> {
        let Some(pair) = self.positions.pair(symbol).await else { return Ok(()) };

        if pair.spot_size.abs() > 0.0 {
            self.close_leg(symbol, pair.spot_size, true).await?;
        }
        if pair.futures_size.abs() > 0.0 {
            self.close_leg(symbol, pair.futures_size, false).await?;
        }

        self.positions.close_pair(symbol).await;
        Ok(())
    }

    async fn close_leg(&self, symbol: &str, current_size: f64, is_spot: bool) -> Result<(), EngineError> {
        let side = if current_size > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
        let slices = if self.config.use_twap { self.config.twap_intervals.max(1) } else { 1 };
        let slice_qty = current_size.abs() / slices as f64;

        for i in 0..slices {
            let request = OrderRequest {
                symbol: symbol.to_string(),
                side,
                order_type: OrderType::Market,
                quantity: slice_qty,
                price: 0.0,
                stop_price: 0.0,
                time_in_force: TimeInForce::Gtc,
                reduce_only: true,
                close_position: i + 1 == slices,
                position_side: PositionSide::Both,
                margin_type: MarginType::Cross,
                is_spot,
                extra_params: Default::default(),
            };
            self.orders.place(request).await?;
            if i + 1 < slices {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
        Ok(())
    }

    /// Idempotent: closing an already-empty set of pairs is a no-op (spec.md §8).
    pub async fn close_all_positions(&self) -> Result<(), EngineError> {
        let symbols: Vec<String> = self.positions.all_pairs().await.into_iter().map(|p| p.symbol).collect();
        for symbol in symbols {
            self.close_pair(&symbol).await?;
        }
        Ok(())
    }

    /// Records the elapsed hour's total PnL into the drawdown series, dispatching an
    /// alert if a DRAWDOWN_LIMIT_BREACH event is emitted (spec.md §4.8).
    pub async fn record_hourly_drawdown(&self, total_pnl: f64, now: i64) {
        self.risk.record_hourly_pnl(total_pnl, now).await;
        for event in self.risk.recent_events().await {
            self.alerts.dispatch(&event).await;
        }
    }

    /// Refreshes cached Position Records from the adapter's authoritative view, feeding
    /// each update into the Risk Controller's continuous monitoring (spec.md §4.4,
    /// §4.7). Used by the Monitor and at the start of every tick.
    pub async fn refresh_positions(&self, now: i64) -> Result<(), EngineError> {
        for record in self.adapter.get_open_positions().await? {
            self.risk.on_position_update(&record, now).await;
            self.positions.update_position(record).await;
        }
        Ok(())
    }
}

fn signed(side: OrderSide, qty: f64) -> f64 {
    match side {
        OrderSide::Buy => qty,
        OrderSide::Sell => -qty,
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alerts::LogAlertSink;
    use crate::infrastructure::mock::{MockExchangeAdapter, MockInstrument};

    fn happy_path_config() -> FundingArbitrageConfig {
        FundingArbitrageConfig {
            top_n_instruments: 1,
            min_basis_ratio: 8e-4,
            min_funding_rate: 1e-4,
            pre_funding_minutes: 60,
            position_size_usd: 1000.0,
            max_position_per_symbol: 1.0,
            max_total_position: 1.0,
            min_liquidity_score: 0.0,
            max_spread_ratio: 1e-2,
            min_volume_usd: 1e6,
            min_market_impact_minutes: 5,
            use_twap: true,
            twap_intervals: 2,
            execution_timeout_seconds: 30,
            max_slippage: 0.01,
            use_post_only: false,
            stop_loss_ratio: 0.005,
            profit_take_ratio: 0.003,
            max_drawdown: 0.1,
            position_imbalance_tolerance: 0.01,
            trading_fee: 0.0004,
            tick_interval_seconds: 5,
            tick_error_backoff_seconds: 5,
        }
    }

    fn test_risk_limits() -> crate::config::RiskLimitsConfig {
        crate::config::RiskLimitsConfig {
            max_position_size: 50_000.0,
            max_total_positions: 200_000.0,
            max_funding_exposure: 50.0,
            max_trades_per_hour: 20,
            min_margin_ratio: 1.5,
            max_drawdown: 0.1,
            max_hourly_loss: 1_000.0,
            max_daily_loss: 5_000.0,
            volatility_threshold: 0.05,
        }
    }

    fn test_risk_control() -> crate::config::RiskControlConfig {
        crate::config::RiskControlConfig {
            auto_reduce_position: true,
            auto_adjust_leverage: true,
            position_reduction_ratio: 0.5,
            max_errors_before_unhealthy: 3,
        }
    }

    async fn engine_with_btcusdt(now: i64) -> (StrategyEngine, Arc<MockExchangeAdapter>) {
        let adapter = Arc::new(MockExchangeAdapter::new());
        adapter
            .set_instrument(
                "BTCUSDT",
                MockInstrument {
                    spot_price: 50000.0,
                    mark_price: 50050.0,
                    funding_rate: 0.0010,
                    next_funding_time: now + 30 * 60,
                    volume_24h: 1.0e7,
                    best_bid: 49998.0,
                    best_ask: 50003.0,
                },
            )
            .await;

        let cache = Arc::new(MarketDataCache::new());
        let orders = Arc::new(OrderManager::new(adapter.clone()));
        let positions = Arc::new(PositionManager::new(orders.clone(), adapter.clone()));
        let risk = Arc::new(RiskController::new(
            test_risk_limits(),
            test_risk_control(),
            orders.clone(),
            adapter.clone(),
            positions.clone(),
            30,
        ));
        let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

        let engine = StrategyEngine::new(
            adapter.clone(),
            cache,
            orders,
            positions,
            risk,
            alerts,
            happy_path_config(),
            100_000.0,
        );
        (engine, adapter)
    }

    #[tokio::test]
    async fn happy_path_pair_trade_opens_balanced_pair() {
        let now = 1_000_000;
        let (engine, _adapter) = engine_with_btcusdt(now).await;

        engine.tick(now).await.unwrap();

        let pair = engine.positions.pair("BTCUSDT").await.expect("pair should be opened");
        assert!(pair.is_balanced(engine.config.position_imbalance_tolerance));
        assert!((pair.entry_basis - 0.001).abs() < 1e-6);
    }

    #[tokio::test]
    async fn window_edge_just_outside_does_not_trade() {
        let now = 1_000_000;
        let (engine, adapter) = engine_with_btcusdt(now).await;
        adapter
            .set_instrument(
                "BTCUSDT",
                MockInstrument {
                    spot_price: 50000.0,
                    mark_price: 50050.0,
                    funding_rate: 0.0010,
                    next_funding_time: now + 61 * 60,
                    volume_24h: 1.0e7,
                    best_bid: 49998.0,
                    best_ask: 50003.0,
                },
            )
            .await;

        engine.tick(now).await.unwrap();
        assert!(engine.positions.pair("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn liquidity_reject_produces_no_trade() {
        let now = 1_000_000;
        let (mut engine, _adapter) = engine_with_btcusdt(now).await;
        // MockExchangeAdapter's book depth is fixed at qty=10 per side (~1e6 USD
        // notional); request a target notional well above that so depth validation fails.
        engine.config.position_size_usd = 2_000_000.0;

        let snapshot = engine.build_snapshot("BTCUSDT").await.unwrap();
        let outcome = engine.evaluate_and_trade(&snapshot, now).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Rejected(_)));
        assert!(engine.positions.pair("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn pre_funding_window_boundary_matches_spec() {
        let (engine, _adapter) = engine_with_btcusdt(0).await;
        let mut snapshot = InstrumentSnapshot {
            symbol: "BTCUSDT".into(),
            spot_price: 50000.0,
            futures_price: 50050.0,
            funding_rate: 0.001,
            next_funding_time: 60 * 60,
            volume_24h: 1.0e7,
            best_bid: 49998.0,
            best_ask: 50003.0,
        };
        assert!(engine.in_pre_funding_window(&snapshot, 0));
        snapshot.next_funding_time = 0;
        assert!(!engine.in_pre_funding_window(&snapshot, 0));
    }

    #[tokio::test]
    async fn close_all_positions_is_idempotent_when_empty() {
        let (engine, _adapter) = engine_with_btcusdt(0).await;
        engine.close_all_positions().await.unwrap();
        engine.close_all_positions().await.unwrap();
    }
}
