//! Streaming manager: subscribe/unsubscribe, heartbeat ping/pong, and
//! reconnect-with-resubscribe (spec.md §4.2, §4.9 reconnect scenario).
//!
//! Grounded on the teacher's `infrastructure/binance/websocket.rs`
//! (`BinanceWebSocketManager::run_websocket`/`connect_and_stream` reconnect-with-backoff
//! loop, ping task fed through an mpsc channel alongside the subscribe/outgoing writer),
//! generalized from a single trade-stream subscription to the funding-rate/mark-price/
//! book-ticker channel set spec.md §4.2 names, fanned out per-subscriber instead of a
//! single shared broadcast consumer.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::domain::errors::EngineError;
use crate::domain::ports::{StreamChannel, StreamEvent};

const PING_INTERVAL_SECONDS: u64 = 180;
const MAX_BACKOFF_SECONDS: u64 = 60;

pub struct BinanceWebSocketManager {
    ws_url: String,
    event_tx: broadcast::Sender<StreamEvent>,
    subscribed: Arc<RwLock<HashMap<String, HashSet<StreamChannel>>>>,
    task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl BinanceWebSocketManager {
    pub fn new(ws_url: String) -> Self {
        let (event_tx, _) = broadcast::channel(2048);
        Self {
            ws_url,
            event_tx,
            subscribed: Arc::new(RwLock::new(HashMap::new())),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn subscribe(
        &self,
        symbol: &str,
        channels: &[StreamChannel],
    ) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
        {
            let mut subscribed = self.subscribed.write().await;
            let entry = subscribed.entry(symbol.to_string()).or_default();
            for channel in channels {
                entry.insert(*channel);
            }
        }
        self.restart_stream_task().await;

        let wanted_symbol = symbol.to_string();
        let wanted_channels: HashSet<StreamChannel> = channels.iter().copied().collect();
        let mut broadcast_rx = self.event_tx.subscribe();
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if event_matches(&event, &wanted_symbol, &wanted_channels) && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(symbol = %wanted_symbol, skipped = n, "subscriber lagged behind stream, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    pub async fn unsubscribe(&self, symbol: &str, channels: &[StreamChannel]) -> Result<(), EngineError> {
        {
            let mut subscribed = self.subscribed.write().await;
            if let Some(entry) = subscribed.get_mut(symbol) {
                for channel in channels {
                    entry.remove(channel);
                }
                if entry.is_empty() {
                    subscribed.remove(symbol);
                }
            }
        }
        self.restart_stream_task().await;
        Ok(())
    }

    async fn restart_stream_task(&self) {
        let symbols: Vec<(String, Vec<StreamChannel>)> = {
            let subscribed = self.subscribed.read().await;
            subscribed
                .iter()
                .map(|(symbol, channels)| (symbol.clone(), channels.iter().copied().collect()))
                .collect()
        };

        let mut handle_guard = self.task_handle.lock().await;
        if let Some(handle) = handle_guard.take() {
            debug!("aborting previous websocket task before resubscribing");
            handle.abort();
        }

        if symbols.is_empty() {
            info!("subscription set empty, not spawning websocket task");
            return;
        }

        let ws_url = self.ws_url.clone();
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            Self::run_with_reconnect(ws_url, symbols, event_tx).await;
        });
        *handle_guard = Some(handle);
    }

    async fn run_with_reconnect(
        ws_url: String,
        symbols: Vec<(String, Vec<StreamChannel>)>,
        event_tx: broadcast::Sender<StreamEvent>,
    ) {
        let mut backoff = 1u64;
        loop {
            match Self::connect_and_stream(&ws_url, &symbols, &event_tx).await {
                Ok(()) => {
                    info!("websocket connection closed gracefully, reconnecting");
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    backoff = 1;
                }
                Err(e) => {
                    error!("websocket error: {e}. reconnecting in {backoff}s");
                    tokio::time::sleep(tokio::time::Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECONDS);
                }
            }
        }
    }

    async fn connect_and_stream(
        ws_url: &str,
        symbols: &[(String, Vec<StreamChannel>)],
        event_tx: &broadcast::Sender<StreamEvent>,
    ) -> anyhow::Result<()> {
        let streams = build_stream_names(symbols);
        if streams.is_empty() {
            return Ok(());
        }

        let url = format!("{}/stream?streams={}", ws_url.trim_end_matches('/'), streams.join("/"));
        info!("connecting to {url}");

        let (ws_stream, _) = connect_async(&url).await?;
        info!("websocket connected");

        let (write, mut read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(100);

        let mut write_sink = write;
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if write_sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_tx = ws_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECONDS));
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = handle_message(&text, event_tx) {
                        debug!("failed to handle message: {e}");
                    }
                }
                Ok(Message::Ping(_)) => {
                    let _ = ws_tx.send(Message::Pong(Vec::new().into())).await;
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!("server closed connection: {frame:?}");
                    break;
                }
                Err(e) => {
                    error!("read error: {e}");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn build_stream_names(symbols: &[(String, Vec<StreamChannel>)]) -> Vec<String> {
    let mut streams = Vec::new();
    for (symbol, channels) in symbols {
        let wire = crate::infrastructure::binance::mapping::denormalize_symbol(symbol).to_lowercase();
        for channel in channels {
            let stream = match channel {
                StreamChannel::MarkPrice => format!("{wire}@markPrice@1s"),
                StreamChannel::FundingRate => format!("{wire}@markPrice@1s"),
                StreamChannel::BookTicker => format!("{wire}@bookTicker"),
            };
            if !streams.contains(&stream) {
                streams.push(stream);
            }
        }
    }
    streams
}

fn event_matches(event: &StreamEvent, symbol: &str, channels: &HashSet<StreamChannel>) -> bool {
    match event {
        StreamEvent::MarkPrice { symbol: s, .. } => s == symbol && channels.contains(&StreamChannel::MarkPrice),
        StreamEvent::FundingRate { symbol: s, .. } => s == symbol && channels.contains(&StreamChannel::FundingRate),
        StreamEvent::BookTicker { symbol: s, .. } => s == symbol && channels.contains(&StreamChannel::BookTicker),
        StreamEvent::OrderUpdate(record) => record.request.symbol == symbol,
        StreamEvent::PositionUpdate { symbol: s, .. } => s == symbol,
        StreamEvent::AccountUpdate { .. } => true,
    }
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    stream: String,
    data: Value,
}

fn handle_message(text: &str, event_tx: &broadcast::Sender<StreamEvent>) -> anyhow::Result<()> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;

    if envelope.stream.contains("@markPrice") {
        #[derive(Debug, Deserialize)]
        struct MarkPriceData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "p")]
            mark_price: String,
            #[serde(rename = "r")]
            funding_rate: String,
            #[serde(rename = "T")]
            next_funding_time: i64,
            #[serde(rename = "E")]
            event_time: i64,
        }
        let data: MarkPriceData = serde_json::from_value(envelope.data)?;
        let symbol = crate::infrastructure::binance::mapping::normalize_symbol(&data.symbol, &["USDT", "USDC", "BUSD"])
            .unwrap_or(data.symbol);
        let mark_price: f64 = data.mark_price.parse().unwrap_or(0.0);
        let funding_rate: f64 = data.funding_rate.parse().unwrap_or(0.0);

        let _ = event_tx.send(StreamEvent::MarkPrice {
            symbol: symbol.clone(),
            price: mark_price,
            at: data.event_time,
        });
        let _ = event_tx.send(StreamEvent::FundingRate {
            symbol,
            rate: funding_rate,
            next_funding_time: data.next_funding_time,
            at: data.event_time,
        });
    } else if envelope.stream.contains("@bookTicker") {
        #[derive(Debug, Deserialize)]
        struct BookTickerData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "b")]
            bid: String,
            #[serde(rename = "a")]
            ask: String,
        }
        let data: BookTickerData = serde_json::from_value(envelope.data)?;
        let symbol = crate::infrastructure::binance::mapping::normalize_symbol(&data.symbol, &["USDT", "USDC", "BUSD"])
            .unwrap_or(data.symbol);
        let _ = event_tx.send(StreamEvent::BookTicker {
            symbol,
            bid: data.bid.parse().unwrap_or(0.0),
            ask: data.ask.parse().unwrap_or(0.0),
            at: chrono::Utc::now().timestamp_millis(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_dedupe_combined_mark_price_channels() {
        let symbols = vec![("BTC/USDT".to_string(), vec![StreamChannel::MarkPrice, StreamChannel::FundingRate])];
        let streams = build_stream_names(&symbols);
        assert_eq!(streams, vec!["btcusdt@markPrice@1s".to_string()]);
    }

    #[test]
    fn event_matches_filters_by_symbol_and_channel() {
        let mut channels = HashSet::new();
        channels.insert(StreamChannel::BookTicker);
        let event = StreamEvent::BookTicker { symbol: "BTC/USDT".into(), bid: 1.0, ask: 2.0, at: 0 };
        assert!(event_matches(&event, "BTC/USDT", &channels));
        assert!(!event_matches(&event, "ETH/USDT", &channels));

        let mark_event = StreamEvent::MarkPrice { symbol: "BTC/USDT".into(), price: 1.0, at: 0 };
        assert!(!event_matches(&mark_event, "BTC/USDT", &channels));
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_leaves_no_active_symbols() {
        let manager = BinanceWebSocketManager::new("wss://example.invalid".to_string());
        let _rx = manager.subscribe("BTC/USDT", &[StreamChannel::BookTicker]).await.unwrap();
        assert_eq!(manager.subscribed.read().await.len(), 1);
        manager.unsubscribe("BTC/USDT", &[StreamChannel::BookTicker]).await.unwrap();
        assert!(manager.subscribed.read().await.is_empty());
    }
}
