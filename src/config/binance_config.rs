//! `api.binance.*` configuration tree (spec.md §6), grounded on the teacher's
//! `config/broker_config.rs::BinanceConfig`.

use crate::config::env::{parse, required_string, string};
use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub max_burst: u32,
    pub orders_per_second: u32,
    pub orders_max_burst: u32,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: String,
    pub ping_interval_sec: u64,
    pub pong_timeout_sec: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval_sec: u64,
}

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub spot_base_url: String,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub websocket: WebSocketConfig,
}

impl BinanceConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            api_key: required_string("BINANCE_API_KEY")?,
            api_secret: required_string("BINANCE_API_SECRET")?,
            base_url: string("BINANCE_BASE_URL", "https://fapi.binance.com"),
            spot_base_url: string("BINANCE_SPOT_BASE_URL", "https://api.binance.com"),
            rate_limit: RateLimitConfig {
                requests_per_second: parse("BINANCE_RATE_LIMIT_RPS", 10)?,
                max_burst: parse("BINANCE_RATE_LIMIT_BURST", 20)?,
                orders_per_second: parse("BINANCE_RATE_LIMIT_ORDERS_PER_SEC", 5)?,
                orders_max_burst: parse("BINANCE_RATE_LIMIT_ORDERS_BURST", 10)?,
            },
            retry: RetryConfig {
                max_retries: parse("BINANCE_RETRY_MAX_RETRIES", 3)?,
                retry_delay_ms: parse("BINANCE_RETRY_DELAY_MS", 1000)?,
                backoff_multiplier: parse("BINANCE_RETRY_BACKOFF_MULTIPLIER", 2.0)?,
            },
            websocket: WebSocketConfig {
                url: string("BINANCE_WS_URL", "wss://fstream.binance.com"),
                ping_interval_sec: parse("BINANCE_WS_PING_INTERVAL_SEC", 180)?,
                pong_timeout_sec: parse("BINANCE_WS_PONG_TIMEOUT_SEC", 10)?,
                max_reconnect_attempts: parse("BINANCE_WS_MAX_RECONNECT_ATTEMPTS", 10)?,
                reconnect_interval_sec: parse("BINANCE_WS_RECONNECT_INTERVAL_SEC", 1)?,
            },
        })
    }
}
