//! Enum <-> wire-string conversions between the core's domain enums and Binance's REST/WS
//! vocabulary. Split out from `rest.rs` the way the teacher keeps `common.rs` separate from
//! `binance.rs`.

use crate::domain::errors::EngineError;
use crate::domain::types::{MarginType, OrderSide, OrderStatus, OrderType, TimeInForce};

pub fn order_side_to_binance(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

pub fn order_type_to_binance(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::PostOnly => "LIMIT_MAKER",
        OrderType::StopMarket => "STOP_MARKET",
        OrderType::StopLimit => "STOP",
        OrderType::TakeProfit => "TAKE_PROFIT",
        OrderType::Liquidation => "LIQUIDATION",
    }
}

pub fn time_in_force_to_binance(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
        TimeInForce::Gtx => "GTX",
    }
}

pub fn margin_type_to_binance(margin_type: MarginType) -> &'static str {
    match margin_type {
        MarginType::Isolated => "ISOLATED",
        MarginType::Cross => "CROSSED",
    }
}

pub fn order_status_from_binance(status: &str) -> Result<OrderStatus, EngineError> {
    match status {
        "NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "CANCELLED" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" => Ok(OrderStatus::Expired),
        "PENDING_CANCEL" => Ok(OrderStatus::PendingCancel),
        other => Err(EngineError::invalid_request(
            "binance.map_order_status",
            None,
            format!("unrecognized Binance order status: {other}"),
        )),
    }
}

/// `BTC/USDT` (the core's normalized form) <-> `BTCUSDT` (Binance's wire form).
pub fn denormalize_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

pub fn normalize_symbol(wire_symbol: &str, quote_assets: &[&str]) -> Result<String, EngineError> {
    for quote in quote_assets {
        if let Some(base) = wire_symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Ok(format!("{base}/{quote}"));
            }
        }
    }
    Err(EngineError::invalid_request(
        "binance.normalize_symbol",
        None,
        format!("unrecognized Binance symbol: {wire_symbol}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denormalizes_slash_symbol() {
        assert_eq!(denormalize_symbol("BTC/USDT"), "BTCUSDT");
    }

    #[test]
    fn normalizes_known_quote_assets() {
        assert_eq!(normalize_symbol("BTCUSDT", &["USDT", "USDC"]).unwrap(), "BTC/USDT");
        assert_eq!(normalize_symbol("ETHUSDC", &["USDT", "USDC"]).unwrap(), "ETH/USDC");
    }

    #[test]
    fn unrecognized_quote_asset_is_invalid_request() {
        assert!(normalize_symbol("BTCXYZ", &["USDT", "USDC"]).is_err());
    }

    #[test]
    fn order_status_round_trips_from_wire_vocabulary() {
        assert_eq!(order_status_from_binance("NEW").unwrap(), OrderStatus::New);
        assert_eq!(order_status_from_binance("CANCELLED").unwrap(), OrderStatus::Canceled);
        assert!(order_status_from_binance("BOGUS").is_err());
    }
}
