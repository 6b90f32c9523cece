//! Priority-ordered validator pipeline guarding every order placement (spec.md §4.7),
//! plus the engine-wide risk metrics and event log (data model §3) that sit behind
//! `metrics_mutex`, the last lock in the fixed acquisition order (§5).
//!
//! Grounded on the teacher's `domain/risk/filters/validator_trait.rs` (`RiskValidator`
//! trait, `ValidationResult::{Approve, Reject}`) and
//! `application/risk_management/pipeline/validation_pipeline.rs`
//! (`RiskValidationPipeline`: sort by priority, fail fast on first rejection).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::application::order_manager::OrderManager;
use crate::application::position_manager::PositionManager;
use crate::config::{RiskControlConfig, RiskLimitsConfig};
use crate::domain::ports::ExchangeAdapter;
use crate::domain::position::PositionRecord;
use crate::domain::risk::{DrawdownTracker, RiskEvent, RiskEventKind, RiskMetrics, RISK_EVENT_RETENTION_SECONDS};
use crate::domain::types::{OrderRequest, OrderSide, OrderType, PositionSide, TimeInForce};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Approve,
    Reject(String),
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationResult::Approve)
    }
}

/// Everything a validator needs to make a decision, assembled fresh for each check
/// (spec.md §4.7: candidate basis/funding rate plus the engine's live risk metrics).
pub struct ValidationContext<'a> {
    pub request: &'a OrderRequest,
    pub candidate_basis: f64,
    pub candidate_funding_rate: f64,
    /// The candidate position size, independent of `request.quantity` (a leg of a pair
    /// trade may request a different quantity than the economic position being sized).
    pub candidate_size: f64,
    pub required_margin: f64,
    pub available_balance: f64,
    /// (max - min) / mean over the recent spot-price window (`MarketDataCache::volatility`).
    pub recent_volatility: f64,
    pub existing_symbol_exposure: f64,
    pub total_exposure: f64,
    pub trades_last_hour: u32,
    pub metrics: &'a RiskMetrics,
    pub limits: &'a RiskLimitsConfig,
    pub min_basis_ratio: f64,
    pub min_funding_rate: f64,
}

#[async_trait]
pub trait RiskValidator: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u8;
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult;
}

pub struct FundingThresholdValidator;

#[async_trait]
impl RiskValidator for FundingThresholdValidator {
    fn name(&self) -> &str {
        "funding_threshold"
    }
    fn priority(&self) -> u8 {
        10
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.candidate_basis.abs() < ctx.min_basis_ratio {
            return ValidationResult::Reject(format!(
                "basis {:.6} below minimum {:.6}",
                ctx.candidate_basis, ctx.min_basis_ratio
            ));
        }
        if ctx.candidate_funding_rate.abs() < ctx.min_funding_rate {
            return ValidationResult::Reject(format!(
                "funding rate {:.6} below minimum {:.6}",
                ctx.candidate_funding_rate, ctx.min_funding_rate
            ));
        }
        ValidationResult::Approve
    }
}

pub struct PositionSizeValidator;

#[async_trait]
impl RiskValidator for PositionSizeValidator {
    fn name(&self) -> &str {
        "position_size"
    }
    fn priority(&self) -> u8 {
        20
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let notional = ctx.request.quantity * ctx.request.price.max(1.0);
        if ctx.existing_symbol_exposure + notional > ctx.limits.max_position_size {
            return ValidationResult::Reject(format!(
                "symbol exposure {:.2} would exceed max_position_size {:.2}",
                ctx.existing_symbol_exposure + notional,
                ctx.limits.max_position_size
            ));
        }
        if ctx.total_exposure + notional > ctx.limits.max_total_positions {
            return ValidationResult::Reject(format!(
                "total exposure {:.2} would exceed max_total_positions {:.2}",
                ctx.total_exposure + notional,
                ctx.limits.max_total_positions
            ));
        }
        ValidationResult::Approve
    }
}

/// `required_margin(symbol, size) <= available_balance` (spec.md §4.7).
pub struct MarginValidator;

#[async_trait]
impl RiskValidator for MarginValidator {
    fn name(&self) -> &str {
        "required_margin"
    }
    fn priority(&self) -> u8 {
        22
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.required_margin > ctx.available_balance {
            return ValidationResult::Reject(format!(
                "required margin {:.2} exceeds available balance {:.2}",
                ctx.required_margin, ctx.available_balance
            ));
        }
        ValidationResult::Approve
    }
}

/// `|funding_rate| * size <= max_funding_exposure` (spec.md §4.7).
pub struct FundingExposureValidator;

#[async_trait]
impl RiskValidator for FundingExposureValidator {
    fn name(&self) -> &str {
        "funding_exposure"
    }
    fn priority(&self) -> u8 {
        24
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let exposure = ctx.candidate_funding_rate.abs() * ctx.candidate_size;
        if exposure > ctx.limits.max_funding_exposure {
            return ValidationResult::Reject(format!(
                "funding exposure {:.6} exceeds max_funding_exposure {:.6}",
                exposure, ctx.limits.max_funding_exposure
            ));
        }
        ValidationResult::Approve
    }
}

/// "Volatility within threshold" over the recent price range/mean (spec.md §4.7).
pub struct VolatilityValidator;

#[async_trait]
impl RiskValidator for VolatilityValidator {
    fn name(&self) -> &str {
        "volatility"
    }
    fn priority(&self) -> u8 {
        26
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.recent_volatility > ctx.limits.volatility_threshold {
            return ValidationResult::Reject(format!(
                "recent volatility {:.4} exceeds volatility_threshold {:.4}",
                ctx.recent_volatility, ctx.limits.volatility_threshold
            ));
        }
        ValidationResult::Approve
    }
}

pub struct TradeFrequencyValidator;

#[async_trait]
impl RiskValidator for TradeFrequencyValidator {
    fn name(&self) -> &str {
        "trade_frequency"
    }
    fn priority(&self) -> u8 {
        30
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.trades_last_hour >= ctx.limits.max_trades_per_hour {
            return ValidationResult::Reject(format!(
                "{} trades in the last hour meets or exceeds max_trades_per_hour {}",
                ctx.trades_last_hour, ctx.limits.max_trades_per_hour
            ));
        }
        ValidationResult::Approve
    }
}

pub struct DrawdownValidator;

#[async_trait]
impl RiskValidator for DrawdownValidator {
    fn name(&self) -> &str {
        "drawdown"
    }
    fn priority(&self) -> u8 {
        40
    }
    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.metrics.current_drawdown >= ctx.limits.max_drawdown {
            return ValidationResult::Reject(format!(
                "current drawdown {:.4} at or beyond max_drawdown {:.4}",
                ctx.metrics.current_drawdown, ctx.limits.max_drawdown
            ));
        }
        ValidationResult::Approve
    }
}

pub struct RiskValidationPipeline {
    validators: Vec<Box<dyn RiskValidator>>,
}

impl RiskValidationPipeline {
    pub fn new(mut validators: Vec<Box<dyn RiskValidator>>) -> Self {
        validators.sort_by_key(|v| v.priority());
        Self { validators }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(FundingThresholdValidator),
            Box::new(PositionSizeValidator),
            Box::new(MarginValidator),
            Box::new(FundingExposureValidator),
            Box::new(VolatilityValidator),
            Box::new(TradeFrequencyValidator),
            Box::new(DrawdownValidator),
        ])
    }

    pub async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        for validator in &self.validators {
            match validator.validate(ctx).await {
                ValidationResult::Reject(reason) => {
                    warn!(validator = validator.name(), reason, "order rejected by risk pipeline");
                    return ValidationResult::Reject(reason);
                }
                ValidationResult::Approve => {
                    debug!(validator = validator.name(), "risk check passed");
                }
            }
        }
        ValidationResult::Approve
    }
}

/// Owns `RiskMetrics`, the hourly `DrawdownTracker`, the 24h-retained `RiskEvent` log,
/// and the configured limits/emergency-action policy, behind `metrics_mutex`. Holds
/// handles into the Order Manager / Exchange Adapter / Position Manager to carry out
/// emergency actions (spec.md §4.7); `metrics_mutex` is always released before crossing
/// into those, so the fixed lock order (§5) is never inverted.
pub struct RiskController {
    pipeline: RiskValidationPipeline,
    limits: RiskLimitsConfig,
    control: RiskControlConfig,
    metrics: Arc<RwLock<RiskMetrics>>,
    drawdown: Arc<RwLock<DrawdownTracker>>,
    events: Arc<RwLock<VecDeque<RiskEvent>>>,
    orders: Arc<OrderManager>,
    adapter: Arc<dyn ExchangeAdapter>,
    positions: Arc<PositionManager>,
    emergency_mode: Arc<AtomicBool>,
    failure_log: Arc<RwLock<VecDeque<i64>>>,
    monitoring_window_seconds: i64,
}

impl RiskController {
    pub fn new(
        limits: RiskLimitsConfig,
        control: RiskControlConfig,
        orders: Arc<OrderManager>,
        adapter: Arc<dyn ExchangeAdapter>,
        positions: Arc<PositionManager>,
        monitoring_window_seconds: i64,
    ) -> Self {
        Self {
            pipeline: RiskValidationPipeline::standard(),
            limits,
            control,
            metrics: Arc::new(RwLock::new(RiskMetrics::default())),
            drawdown: Arc::new(RwLock::new(DrawdownTracker::new())),
            events: Arc::new(RwLock::new(VecDeque::new())),
            orders,
            adapter,
            positions,
            emergency_mode: Arc::new(AtomicBool::new(false)),
            failure_log: Arc::new(RwLock::new(VecDeque::new())),
            monitoring_window_seconds,
        }
    }

    /// Conjunctive pre-trade validation (spec.md §4.7), rejecting outright while
    /// emergency mode is engaged.
    pub async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if self.emergency_mode.load(Ordering::SeqCst) {
            return ValidationResult::Reject(
                "emergency mode engaged: rejecting all new positions until an operator clears it".to_string(),
            );
        }
        self.pipeline.validate(ctx).await
    }

    /// `approve_new_position(symbol, size, funding_rate) -> bool` (spec.md §4.7). Takes
    /// the full `ValidationContext` rather than bare scalars: the conjunctive checks
    /// need margin/volatility/trade-count context a three-argument signature can't carry.
    pub async fn approve_new_position(&self, ctx: &ValidationContext<'_>) -> bool {
        self.validate(ctx).await.is_approved()
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency_mode.load(Ordering::SeqCst)
    }

    /// The only way emergency mode is lifted: operator intervention (spec.md §4.7).
    pub fn clear_emergency_mode(&self) {
        self.emergency_mode.store(false, Ordering::SeqCst);
    }

    async fn engage_emergency_mode(&self, reason: &str) {
        if !self.emergency_mode.swap(true, Ordering::SeqCst) {
            warn!(reason, "emergency mode engaged; approve_new_position will reject until cleared");
        }
    }

    /// Counts a tick/adapter failure toward the "persistent repeated failures" trigger
    /// (spec.md §7): `monitoring_window_seconds` is a sliding window, and reaching
    /// `max_errors_before_unhealthy` failures inside it engages emergency mode.
    pub async fn record_failure(&self, now: i64) {
        let mut log = self.failure_log.write().await;
        log.push_back(now);
        while let Some(front) = log.front() {
            if now - front > self.monitoring_window_seconds {
                log.pop_front();
            } else {
                break;
            }
        }
        let count = log.len() as u32;
        drop(log);

        if count >= self.control.max_errors_before_unhealthy {
            self.engage_emergency_mode("persistent repeated failures within one monitoring window").await;
        }
    }

    pub fn limits(&self) -> &RiskLimitsConfig {
        &self.limits
    }

    pub async fn metrics(&self) -> RiskMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn update_metrics(&self, metrics: RiskMetrics) {
        *self.metrics.write().await = metrics;
    }

    /// Continuous monitoring (spec.md §4.7): recomputed on every position update,
    /// recording MARGIN_CALL / LIQUIDATION_WARNING / DAILY_LOSS_LIMIT_BREACH, and
    /// invoking emergency actions on a liquidation warning.
    pub async fn on_position_update(&self, position: &PositionRecord, now: i64) {
        let notional = position.size.abs() * position.mark_price;
        let margin_ratio = if notional > 0.0 { position.margin / notional } else { f64::MAX };
        if margin_ratio < self.limits.min_margin_ratio {
            self.emit(RiskEvent {
                kind: RiskEventKind::MarginCall,
                symbol: Some(position.symbol.clone()),
                current_value: margin_ratio,
                threshold: self.limits.min_margin_ratio,
                at: now,
            })
            .await;
        }

        if position.mark_price > 0.0 {
            let liquidation_gap = (position.mark_price - position.liquidation_price).abs() / position.mark_price;
            if liquidation_gap < 0.05 {
                self.emit(RiskEvent {
                    kind: RiskEventKind::LiquidationWarning,
                    symbol: Some(position.symbol.clone()),
                    current_value: liquidation_gap,
                    threshold: 0.05,
                    at: now,
                })
                .await;
                self.apply_emergency_actions(position, now).await;
            }
        }

        let metrics = self.metrics.read().await.clone();
        if metrics.hourly_pnl < -self.limits.max_hourly_loss || metrics.daily_pnl < -self.limits.max_daily_loss {
            self.emit(RiskEvent {
                kind: RiskEventKind::DailyLossLimitBreach,
                symbol: Some(position.symbol.clone()),
                current_value: metrics.daily_pnl.min(metrics.hourly_pnl),
                threshold: -self.limits.max_daily_loss,
                at: now,
            })
            .await;
        }
    }

    /// Records the elapsed hour's realized+unrealized PnL; emits DRAWDOWN_LIMIT_BREACH
    /// and DAILY_LOSS_LIMIT_BREACH when their respective thresholds are crossed, and
    /// runs emergency actions against every open position on a drawdown breach
    /// (spec.md §4.7, §4.8, end-to-end scenario 5).
    pub async fn record_hourly_pnl(&self, total_pnl: f64, now: i64) {
        let mut drawdown = self.drawdown.write().await;
        drawdown.record_hour(total_pnl);
        let current = drawdown.current_drawdown();
        let daily = drawdown.daily_pnl();
        drop(drawdown);

        {
            let mut metrics = self.metrics.write().await;
            metrics.current_drawdown = current;
            metrics.hourly_pnl = total_pnl;
            metrics.daily_pnl = daily;
        }

        if current >= self.limits.max_drawdown {
            self.emit(RiskEvent {
                kind: RiskEventKind::DrawdownLimitBreach,
                symbol: None,
                current_value: current,
                threshold: self.limits.max_drawdown,
                at: now,
            })
            .await;
            self.apply_emergency_actions_to_all_positions(now).await;
        }

        if total_pnl < -self.limits.max_hourly_loss || daily < -self.limits.max_daily_loss {
            self.emit(RiskEvent {
                kind: RiskEventKind::DailyLossLimitBreach,
                symbol: None,
                current_value: daily.min(total_pnl),
                threshold: -self.limits.max_daily_loss,
                at: now,
            })
            .await;
        }
    }

    async fn apply_emergency_actions_to_all_positions(&self, now: i64) {
        for position in self.positions.all_positions().await {
            self.apply_emergency_actions(&position, now).await;
        }
    }

    /// On LIQUIDATION_WARNING or DRAWDOWN_LIMIT_BREACH: reduce-only order for
    /// `|size| * position_reduction_ratio` if `auto_reduce_position`, and halve
    /// leverage (floored at 1) if `auto_adjust_leverage` (spec.md §4.7).
    async fn apply_emergency_actions(&self, position: &PositionRecord, _now: i64) {
        if self.control.auto_reduce_position {
            let qty = position.size.abs() * self.control.position_reduction_ratio;
            if qty > 0.0 {
                let side = if position.size > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
                let request = OrderRequest {
                    symbol: position.symbol.clone(),
                    side,
                    order_type: OrderType::Market,
                    quantity: qty,
                    price: 0.0,
                    stop_price: 0.0,
                    time_in_force: TimeInForce::Gtc,
                    reduce_only: true,
                    close_position: false,
                    position_side: PositionSide::Both,
                    margin_type: position.margin_type,
                    is_spot: false,
                    extra_params: Default::default(),
                };
                if let Err(e) = self.orders.place(request).await {
                    warn!(symbol = %position.symbol, error = %e, "failed to place emergency reduce-only order");
                }
            }
        }

        if self.control.auto_adjust_leverage && position.leverage > 1.0 {
            let new_leverage = (position.leverage / 2.0).max(1.0);
            if let Err(e) = self.adapter.set_leverage(&position.symbol, new_leverage).await {
                warn!(symbol = %position.symbol, error = %e, "failed to auto-adjust leverage");
            }
        }
    }

    pub async fn emit(&self, event: RiskEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        self.evict_stale(&mut events, chrono::Utc::now().timestamp());
    }

    fn evict_stale(&self, events: &mut VecDeque<RiskEvent>, now: i64) {
        while let Some(front) = events.front() {
            if now - front.at > RISK_EVENT_RETENTION_SECONDS {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    pub async fn recent_events(&self) -> Vec<RiskEvent> {
        self.events.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MarginType as TestMarginType, OrderSide as TestOrderSide, OrderType as TestOrderType, PositionSide as TestPositionSide, TimeInForce as TestTimeInForce};
    use crate::infrastructure::mock::{MockExchangeAdapter, MockInstrument};

    fn limits() -> RiskLimitsConfig {
        RiskLimitsConfig {
            max_position_size: 10_000.0,
            max_total_positions: 50_000.0,
            max_funding_exposure: 50.0,
            max_trades_per_hour: 20,
            min_margin_ratio: 1.5,
            max_drawdown: 0.1,
            max_hourly_loss: 1_000.0,
            max_daily_loss: 5_000.0,
            volatility_threshold: 0.05,
        }
    }

    fn control() -> RiskControlConfig {
        RiskControlConfig {
            auto_reduce_position: true,
            auto_adjust_leverage: true,
            position_reduction_ratio: 0.5,
            max_errors_before_unhealthy: 3,
        }
    }

    fn request() -> OrderRequest {
        OrderRequest {
            symbol: "BTC/USDT".into(),
            side: TestOrderSide::Buy,
            order_type: TestOrderType::Market,
            quantity: 1.0,
            price: 100.0,
            stop_price: 0.0,
            time_in_force: TestTimeInForce::Gtc,
            reduce_only: false,
            close_position: false,
            position_side: TestPositionSide::Both,
            margin_type: TestMarginType::Cross,
            is_spot: false,
            extra_params: Default::default(),
        }
    }

    fn context<'a>(req: &'a OrderRequest, metrics: &'a RiskMetrics, limits: &'a RiskLimitsConfig) -> ValidationContext<'a> {
        ValidationContext {
            request: req,
            candidate_basis: 0.002,
            candidate_funding_rate: 0.01,
            candidate_size: 1.0,
            required_margin: 100.0,
            available_balance: 100_000.0,
            recent_volatility: 0.01,
            existing_symbol_exposure: 0.0,
            total_exposure: 0.0,
            trades_last_hour: 0,
            metrics,
            limits,
            min_basis_ratio: 8e-4,
            min_funding_rate: 1e-4,
        }
    }

    async fn controller() -> RiskController {
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
        let orders = Arc::new(OrderManager::new(adapter.clone()));
        let positions = Arc::new(PositionManager::new(orders.clone(), adapter.clone()));
        RiskController::new(limits(), control(), orders, adapter, positions, 60)
    }

    #[tokio::test]
    async fn basis_below_minimum_rejects_before_position_size_runs() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let mut ctx = context(&req, &metrics, &limits);
        ctx.candidate_basis = 0.0001;
        let result = pipeline.validate(&ctx).await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn position_size_over_cap_rejects() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let mut ctx = context(&req, &metrics, &limits);
        ctx.existing_symbol_exposure = 9_950.0;
        let result = pipeline.validate(&ctx).await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn required_margin_over_balance_rejects() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let mut ctx = context(&req, &metrics, &limits);
        ctx.required_margin = 5_000.0;
        ctx.available_balance = 1_000.0;
        let result = pipeline.validate(&ctx).await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn funding_exposure_over_cap_rejects() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let mut ctx = context(&req, &metrics, &limits);
        ctx.candidate_funding_rate = 1.0;
        ctx.candidate_size = 1_000.0;
        let result = pipeline.validate(&ctx).await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn volatility_over_threshold_rejects() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let mut ctx = context(&req, &metrics, &limits);
        ctx.recent_volatility = 0.5;
        let result = pipeline.validate(&ctx).await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn all_checks_pass_when_within_limits() {
        let pipeline = RiskValidationPipeline::standard();
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let ctx = context(&req, &metrics, &limits);
        assert_eq!(pipeline.validate(&ctx).await, ValidationResult::Approve);
    }

    #[tokio::test]
    async fn drawdown_breach_emits_event() {
        let controller = controller().await;
        for pnl in [100.0, 90.0, 80.0, 70.0, 60.0, 50.0] {
            controller.record_hourly_pnl(pnl, 0).await;
        }
        let events = controller.recent_events().await;
        assert!(events.iter().any(|e| e.kind == RiskEventKind::DrawdownLimitBreach));
    }

    #[tokio::test]
    async fn risk_events_evict_beyond_retention_window() {
        let controller = controller().await;
        controller
            .emit(RiskEvent { kind: RiskEventKind::DrawdownLimitBreach, symbol: None, current_value: 0.2, threshold: 0.1, at: 0 })
            .await;
        controller
            .emit(RiskEvent {
                kind: RiskEventKind::DrawdownLimitBreach,
                symbol: None,
                current_value: 0.2,
                threshold: 0.1,
                at: RISK_EVENT_RETENTION_SECONDS + 1,
            })
            .await;
        let events = controller.recent_events().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn emergency_mode_forces_rejection_until_cleared() {
        let controller = controller().await;
        let metrics = RiskMetrics::default();
        let limits = limits();
        let req = request();
        let ctx = context(&req, &metrics, &limits);
        assert!(controller.approve_new_position(&ctx).await);

        controller.record_failure(0).await;
        controller.record_failure(1).await;
        controller.record_failure(2).await;
        assert!(controller.is_emergency_mode());
        assert!(!controller.approve_new_position(&ctx).await);

        controller.clear_emergency_mode();
        assert!(controller.approve_new_position(&ctx).await);
    }

    #[tokio::test]
    async fn stale_failures_outside_the_monitoring_window_do_not_accumulate() {
        let controller = controller().await;
        controller.record_failure(0).await;
        controller.record_failure(1).await;
        controller.record_failure(1_000).await;
        assert!(!controller.is_emergency_mode());
    }

    #[tokio::test]
    async fn liquidation_warning_emits_and_triggers_reduce_only_order() {
        let controller = controller().await;
        let position = PositionRecord {
            symbol: "BTC/USDT".into(),
            size: 0.02,
            entry_price: 50000.0,
            mark_price: 50000.0,
            liquidation_price: 49000.0,
            margin: 1000.0,
            leverage: 5.0,
            margin_type: TestMarginType::Cross,
            updated_at: 0,
        };
        controller.on_position_update(&position, 0).await;
        let events = controller.recent_events().await;
        assert!(events.iter().any(|e| e.kind == RiskEventKind::LiquidationWarning));
    }

    #[tokio::test]
    async fn margin_call_emits_when_margin_ratio_below_minimum() {
        let controller = controller().await;
        let position = PositionRecord {
            symbol: "BTC/USDT".into(),
            size: 1.0,
            entry_price: 50000.0,
            mark_price: 50000.0,
            liquidation_price: 10.0,
            margin: 500.0,
            leverage: 5.0,
            margin_type: TestMarginType::Cross,
            updated_at: 0,
        };
        controller.on_position_update(&position, 0).await;
        let events = controller.recent_events().await;
        assert!(events.iter().any(|e| e.kind == RiskEventKind::MarginCall));
    }
}
