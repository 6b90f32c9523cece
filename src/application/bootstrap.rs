//! Wiring: constructs every component from `Config` and hands back an `Engine` ready
//! to `start()`. Grounded on the teacher's `application/system/mod.rs::Application`
//! (`build(config)` constructs services bottom-up, `start(self)` spawns long-lived
//! tasks and installs the ctrl-c shutdown handler), collapsed from the teacher's
//! multi-bootstrap-module layering (agents/persistence/services) to this core's
//! flatter component graph.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::alerts::{AlertSink, LogAlertSink};
use crate::application::market_data_cache::MarketDataCache;
use crate::application::monitor::{FundingRateLog, Metrics};
use crate::application::order_manager::OrderManager;
use crate::application::position_manager::PositionManager;
use crate::application::risk_controller::RiskController;
use crate::application::strategy_engine::StrategyEngine;
use crate::config::Config;
use crate::domain::ports::ExchangeAdapter;
use crate::infrastructure::binance::BinanceAdapter;

pub struct Engine {
    pub config: Config,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub cache: Arc<MarketDataCache>,
    pub orders: Arc<OrderManager>,
    pub positions: Arc<PositionManager>,
    pub risk: Arc<RiskController>,
    pub strategy: Arc<StrategyEngine>,
    pub metrics: Arc<Metrics>,
    pub funding_log: Option<Arc<FundingRateLog>>,
}

impl Engine {
    /// Builds every component from config, wired bottom-up: adapter, then the
    /// managers that drive it, then the strategy engine that owns Pair State.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        info!("building funding arbitrage engine");

        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(BinanceAdapter::new(
            config.binance.api_key.clone(),
            config.binance.api_secret.clone(),
            config.binance.spot_base_url.clone(),
            config.binance.base_url.clone(),
            config.binance.websocket.url.clone(),
            config.binance.retry.max_retries,
            config.binance.rate_limit.requests_per_second,
            config.binance.rate_limit.max_burst,
            config.binance.rate_limit.orders_per_second,
            config.binance.rate_limit.orders_max_burst,
        ));

        let cache = Arc::new(MarketDataCache::new());
        let orders = Arc::new(OrderManager::with_slippage_policy(
            adapter.clone(),
            config.strategy.max_slippage,
            config.strategy.use_post_only,
        ));
        let positions = Arc::new(PositionManager::new(orders.clone(), adapter.clone()));
        let risk = Arc::new(RiskController::new(
            config.risk.limits.clone(),
            config.risk.control.clone(),
            orders.clone(),
            adapter.clone(),
            positions.clone(),
            config.monitor.general.snapshot_interval_seconds as i64,
        ));
        let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
        let metrics = Arc::new(Metrics::new()?);

        let total_equity = adapter.get_balance("USDT").await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to fetch initial account balance, defaulting total_equity to 0");
            0.0
        });

        let strategy = Arc::new(StrategyEngine::new(
            adapter.clone(),
            cache.clone(),
            orders.clone(),
            positions.clone(),
            risk.clone(),
            alerts,
            config.strategy.clone(),
            total_equity,
        ));

        let funding_log = match FundingRateLog::open("funding_rates.csv") {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                warn!(error = %e, "failed to open funding rate log, continuing without it");
                None
            }
        };

        Ok(Self { config, adapter, cache, orders, positions, risk, strategy, metrics, funding_log })
    }

    /// Spawns the strategy control loop, the Prometheus scrape endpoint (if enabled),
    /// and the periodic snapshot/alert task, then installs the ctrl-c shutdown hook.
    /// Blocks until a shutdown signal is received.
    pub async fn run(self) -> anyhow::Result<()> {
        let strategy = self.strategy.clone();
        let strategy_handle = tokio::spawn(async move {
            strategy.run().await;
        });

        let mut prometheus_handle = None;
        if self.config.monitor.prometheus.enabled {
            let bind_address = self.config.monitor.prometheus.bind_address.clone();
            let metrics = self.metrics.clone();
            prometheus_handle = Some(tokio::spawn(async move {
                if let Err(e) = crate::application::monitor::serve_metrics(bind_address, metrics).await {
                    error!(error = %e, "prometheus scrape endpoint exited");
                }
            }));
        }

        let snapshot_handle = self.spawn_snapshot_task();

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }

        self.strategy.request_stop();
        snapshot_handle.abort();
        if let Some(handle) = prometheus_handle {
            handle.abort();
        }
        let _ = strategy_handle.await;

        Ok(())
    }

    fn spawn_snapshot_task(&self) -> tokio::task::JoinHandle<()> {
        let risk = self.risk.clone();
        let positions = self.positions.clone();
        let metrics = self.metrics.clone();
        let interval_seconds = self.config.monitor.general.snapshot_interval_seconds;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                let risk_metrics = risk.metrics().await;
                let open_pairs = positions.all_pairs().await.len();
                metrics.record_snapshot(open_pairs, &risk_metrics);
            }
        })
    }
}
