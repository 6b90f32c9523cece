//! Snapshot cache of per-symbol `InstrumentSnapshot`s, fed by the adapter's streaming
//! subscriptions and periodic REST polling (spec.md §4.3).
//!
//! Grounded on the teacher's `application/market_data/spread_cache.rs::SpreadCache`
//! (a `RwLock<HashMap<...>>` keyed by symbol, a staleness check by elapsed time),
//! generalized from bid/ask-only spread data to the full `InstrumentSnapshot`.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::types::InstrumentSnapshot;

/// Recent-price window length used for the volatility check (spec.md §4.7).
const PRICE_HISTORY_LEN: usize = 20;

pub struct MarketDataCache {
    snapshots: RwLock<HashMap<String, InstrumentSnapshot>>,
    price_history: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self { snapshots: RwLock::new(HashMap::new()), price_history: RwLock::new(HashMap::new()) }
    }

    pub async fn update(&self, snapshot: InstrumentSnapshot) {
        if snapshot.spread() / snapshot.spot_price.max(1e-9) > 0.01 {
            debug!(symbol = %snapshot.symbol, spread = snapshot.spread(), "unusually wide spread observed");
        }

        let mut history = self.price_history.write().await;
        let series = history.entry(snapshot.symbol.clone()).or_default();
        if series.len() == PRICE_HISTORY_LEN {
            series.pop_front();
        }
        series.push_back(snapshot.spot_price);
        drop(history);

        self.snapshots.write().await.insert(snapshot.symbol.clone(), snapshot);
    }

    /// (max - min) / mean over the recent spot-price window; 0.0 with fewer than two
    /// observed prices (spec.md §4.7's "volatility within threshold" pre-trade check).
    pub async fn volatility(&self, symbol: &str) -> f64 {
        let history = self.price_history.read().await;
        let Some(series) = history.get(symbol) else { return 0.0 };
        if series.len() < 2 {
            return 0.0;
        }
        let mean = series.iter().sum::<f64>() / series.len() as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let max = series.iter().cloned().fold(f64::MIN, f64::max);
        let min = series.iter().cloned().fold(f64::MAX, f64::min);
        (max - min) / mean
    }

    pub async fn get(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        self.snapshots.read().await.get(symbol).cloned()
    }

    pub async fn all(&self) -> Vec<InstrumentSnapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }

    pub async fn is_stale(&self, symbol: &str, now: i64, threshold_seconds: i64) -> bool {
        match self.snapshots.read().await.get(symbol) {
            Some(snap) => now - snap.next_funding_time > threshold_seconds || false,
            None => true,
        }
    }

    pub async fn remove(&self, symbol: &str) {
        self.snapshots.write().await.remove(symbol);
        self.price_history.write().await.remove(symbol);
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(symbol: &str) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: symbol.to_string(),
            spot_price: 50000.0,
            futures_price: 50050.0,
            funding_rate: 0.001,
            next_funding_time: 1000,
            volume_24h: 1.0e7,
            best_bid: 49995.0,
            best_ask: 50005.0,
        }
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let cache = MarketDataCache::new();
        cache.update(sample("BTC/USDT")).await;
        let snap = cache.get("BTC/USDT").await.unwrap();
        assert!((snap.basis() - 0.001).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_symbol_reports_stale() {
        let cache = MarketDataCache::new();
        assert!(cache.is_stale("BTC/USDT", 0, 60).await);
    }

    #[tokio::test]
    async fn remove_evicts_symbol() {
        let cache = MarketDataCache::new();
        cache.update(sample("BTC/USDT")).await;
        cache.remove("BTC/USDT").await;
        assert!(cache.get("BTC/USDT").await.is_none());
    }

    #[tokio::test]
    async fn volatility_is_zero_for_a_single_observation() {
        let cache = MarketDataCache::new();
        cache.update(sample("BTC/USDT")).await;
        assert_eq!(cache.volatility("BTC/USDT").await, 0.0);
    }

    #[tokio::test]
    async fn volatility_reflects_range_over_mean() {
        let cache = MarketDataCache::new();
        for spot in [50000.0, 51000.0, 49000.0] {
            let mut snap = sample("BTC/USDT");
            snap.spot_price = spot;
            cache.update(snap).await;
        }
        // (51000 - 49000) / 50000 = 0.04
        assert!((cache.volatility("BTC/USDT").await - 0.04).abs() < 1e-6);
    }

    #[tokio::test]
    async fn price_history_window_is_bounded() {
        let cache = MarketDataCache::new();
        for i in 0..30 {
            let mut snap = sample("BTC/USDT");
            snap.spot_price = 50000.0 + i as f64;
            cache.update(snap).await;
        }
        let history = cache.price_history.read().await;
        assert_eq!(history.get("BTC/USDT").unwrap().len(), super::PRICE_HISTORY_LEN);
    }
}
