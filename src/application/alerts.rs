//! Alert dispatch seam (spec.md's ambient stack: the engine surfaces risk/drawdown
//! events somewhere beyond its own log stream, but never prescribes a channel).
//!
//! Grounded on the risk-orchestrator alert model in the funding-fee-farmer reference
//! (`RiskAlert`/`AlertSeverity`, logged at a severity-matched tracing level), adapted
//! to this engine's `RiskEvent` domain type instead of inventing a parallel alert type.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::risk::{RiskEvent, RiskEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

fn severity_for(kind: RiskEventKind) -> AlertSeverity {
    match kind {
        RiskEventKind::FundingRateWarning | RiskEventKind::TradeFrequencyWarning => AlertSeverity::Info,
        RiskEventKind::HighVolatility | RiskEventKind::PositionLimitBreach | RiskEventKind::MarginCall => {
            AlertSeverity::Warning
        }
        RiskEventKind::DrawdownLimitBreach
        | RiskEventKind::DailyLossLimitBreach
        | RiskEventKind::LiquidationWarning => AlertSeverity::Critical,
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn dispatch(&self, event: &RiskEvent);
}

/// Default sink: routes through `tracing` at a level matched to severity. Swappable
/// for a webhook/Slack sink without touching the risk controller.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn dispatch(&self, event: &RiskEvent) {
        let severity = severity_for(event.kind);
        match severity {
            AlertSeverity::Info => info!(
                kind = ?event.kind, symbol = ?event.symbol, current = event.current_value, threshold = event.threshold,
                "risk event"
            ),
            AlertSeverity::Warning => warn!(
                kind = ?event.kind, symbol = ?event.symbol, current = event.current_value, threshold = event.threshold,
                "risk event"
            ),
            AlertSeverity::Critical => error!(
                kind = ?event.kind, symbol = ?event.symbol, current = event.current_value, threshold = event.threshold,
                "risk event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawdown_breach_is_critical() {
        assert_eq!(severity_for(RiskEventKind::DrawdownLimitBreach), AlertSeverity::Critical);
    }

    #[test]
    fn trade_frequency_warning_is_informational() {
        assert_eq!(severity_for(RiskEventKind::TradeFrequencyWarning), AlertSeverity::Info);
    }

    #[tokio::test]
    async fn log_alert_sink_dispatches_without_panicking() {
        let sink = LogAlertSink;
        sink.dispatch(&RiskEvent {
            kind: RiskEventKind::DrawdownLimitBreach,
            symbol: Some("BTC/USDT".into()),
            current_value: 0.2,
            threshold: 0.1,
            at: 0,
        })
        .await;
    }
}
