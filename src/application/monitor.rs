//! Prometheus metrics registry, periodic snapshot logging, and the funding-rate CSV
//! trail (spec.md's ambient observability: excluded from the strategy's own Non-goals,
//! but still part of a complete engine).
//!
//! Grounded on the teacher's `infrastructure/observability/metrics.rs` (`Metrics`: a
//! `prometheus::Registry` wrapping named gauges/counters, `render()` via `TextEncoder`),
//! generalized from the teacher's portfolio/sentiment metric set to the funding
//! arbitrage domain, and exposed over a minimal `tokio::net::TcpListener` HTTP/1.0
//! responder the way a small scrape endpoint is commonly hand-rolled without pulling in
//! a full web framework.

use prometheus::{CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::domain::risk::RiskMetrics;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub open_pairs: Gauge,
    pub total_exposure_usd: Gauge,
    pub current_drawdown: Gauge,
    pub hourly_pnl_usd: Gauge,
    pub daily_pnl_usd: Gauge,
    pub funding_rate: GaugeVec,
    pub basis: GaugeVec,
    pub orders_total: CounterVec,
    pub risk_events_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let open_pairs = Gauge::with_opts(Opts::new("fundarb_open_pairs", "Currently open arbitrage pairs"))?;
        registry.register(Box::new(open_pairs.clone()))?;

        let total_exposure_usd =
            Gauge::with_opts(Opts::new("fundarb_total_exposure_usd", "Total notional exposure in USD"))?;
        registry.register(Box::new(total_exposure_usd.clone()))?;

        let current_drawdown = Gauge::with_opts(Opts::new("fundarb_current_drawdown", "Current drawdown ratio"))?;
        registry.register(Box::new(current_drawdown.clone()))?;

        let hourly_pnl_usd = Gauge::with_opts(Opts::new("fundarb_hourly_pnl_usd", "Realized+unrealized PnL for the current hour"))?;
        registry.register(Box::new(hourly_pnl_usd.clone()))?;

        let daily_pnl_usd = Gauge::with_opts(Opts::new("fundarb_daily_pnl_usd", "Realized+unrealized PnL for the current day"))?;
        registry.register(Box::new(daily_pnl_usd.clone()))?;

        let funding_rate = GaugeVec::new(Opts::new("fundarb_funding_rate", "Last observed funding rate per symbol"), &["symbol"])?;
        registry.register(Box::new(funding_rate.clone()))?;

        let basis = GaugeVec::new(Opts::new("fundarb_basis", "Last observed futures/spot basis per symbol"), &["symbol"])?;
        registry.register(Box::new(basis.clone()))?;

        let orders_total = CounterVec::new(Opts::new("fundarb_orders_total", "Orders placed by side and status"), &["side", "status"])?;
        registry.register(Box::new(orders_total.clone()))?;

        let risk_events_total = CounterVec::new(Opts::new("fundarb_risk_events_total", "Risk events emitted by kind"), &["kind"])?;
        registry.register(Box::new(risk_events_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            open_pairs,
            total_exposure_usd,
            current_drawdown,
            hourly_pnl_usd,
            daily_pnl_usd,
            funding_rate,
            basis,
            orders_total,
            risk_events_total,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&self.registry.gather()).unwrap_or_default()
    }

    pub fn record_snapshot(&self, open_pairs: usize, risk_metrics: &RiskMetrics) {
        self.open_pairs.set(open_pairs as f64);
        self.total_exposure_usd.set(risk_metrics.total_exposure);
        self.current_drawdown.set(risk_metrics.current_drawdown);
        self.hourly_pnl_usd.set(risk_metrics.hourly_pnl);
        self.daily_pnl_usd.set(risk_metrics.daily_pnl);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("prometheus metric registration should not fail at startup")
    }
}

/// Serves `GET /metrics` in Prometheus text exposition format. No routing, no
/// keep-alive: one request per connection, close after responding.
pub async fn serve_metrics(bind_address: String, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&bind_address).await?;
    info!(bind_address, "prometheus scrape endpoint listening");

    loop {
        let (mut socket, _) = listener.accept().await?;
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let body = metrics.render();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                warn!(error = %e, "failed writing metrics response");
            }
        });
    }
}

/// Appends one row per observed funding rate to a CSV trail (spec.md's ambient
/// observability: a plain audit log independent of the Prometheus scrape surface).
pub struct FundingRateLog {
    writer: tokio::sync::Mutex<csv::Writer<std::fs::File>>,
}

impl FundingRateLog {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let file_exists = std::path::Path::new(path).exists();
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(!file_exists).from_writer(file);
        if !file_exists {
            writer.write_record(["timestamp", "symbol", "funding_rate", "basis"])?;
            writer.flush()?;
        }
        Ok(Self { writer: tokio::sync::Mutex::new(writer) })
    }

    pub async fn append(&self, timestamp: i64, symbol: &str, funding_rate: f64, basis: f64) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_record([
            timestamp.to_string(),
            symbol.to_string(),
            funding_rate.to_string(),
            basis.to_string(),
        ]) {
            error!(error = %e, "failed to append funding rate log row");
            return;
        }
        let _ = writer.flush();
    }
}
