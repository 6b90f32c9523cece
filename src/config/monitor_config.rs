//! `monitor.{general,prometheus,alerts}.*` configuration tree (spec.md §6).

use crate::config::env::{parse, string};
use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct GeneralMonitorConfig {
    pub snapshot_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub bind_address: String,
}

#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub drawdown_warning_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub general: GeneralMonitorConfig,
    pub prometheus: PrometheusConfig,
    pub alerts: AlertsConfig,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            general: GeneralMonitorConfig {
                snapshot_interval_seconds: parse("MONITOR_SNAPSHOT_INTERVAL_SECONDS", 30)?,
            },
            prometheus: PrometheusConfig {
                enabled: parse("MONITOR_PROMETHEUS_ENABLED", true)?,
                bind_address: string("MONITOR_PROMETHEUS_BIND_ADDRESS", "0.0.0.0:9898"),
            },
            alerts: AlertsConfig {
                drawdown_warning_threshold: parse("MONITOR_ALERTS_DRAWDOWN_WARNING_THRESHOLD", 0.08)?,
            },
        })
    }
}
