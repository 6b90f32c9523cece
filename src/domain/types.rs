//! Core trading enums and the request/record pair the rest of the core exchanges.
//!
//! Mirrors the teacher's `domain/trading/types.rs`: plain, serializable structs and
//! `Display`/`FromStr` round trips on every wire enum, no behavior baked into the types
//! themselves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(EngineError::invalid_request(
                "parse_order_side",
                None,
                format!("unknown order side: {other}"),
            )),
        }
    }
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    PostOnly,
    StopMarket,
    StopLimit,
    TakeProfit,
    Liquidation,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::PostOnly => "POST_ONLY",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::Liquidation => "LIQUIDATION",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "POST_ONLY" => Ok(OrderType::PostOnly),
            "STOP_MARKET" => Ok(OrderType::StopMarket),
            "STOP_LIMIT" => Ok(OrderType::StopLimit),
            "TAKE_PROFIT" => Ok(OrderType::TakeProfit),
            "LIQUIDATION" => Ok(OrderType::Liquidation),
            other => Err(EngineError::invalid_request(
                "parse_order_type",
                None,
                format!("unknown order type: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TimeInForce {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            "FOK" => Ok(TimeInForce::Fok),
            "GTX" => Ok(TimeInForce::Gtx),
            other => Err(EngineError::invalid_request(
                "parse_time_in_force",
                None,
                format!("unknown time in force: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Both => "BOTH",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PositionSide {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            "BOTH" => Ok(PositionSide::Both),
            other => Err(EngineError::invalid_request(
                "parse_position_side",
                None,
                format!("unknown position side: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginType {
    Isolated,
    Cross,
}

impl fmt::Display for MarginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSSED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MarginType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ISOLATED" => Ok(MarginType::Isolated),
            "CROSSED" | "CROSS" => Ok(MarginType::Cross),
            other => Err(EngineError::invalid_request(
                "parse_margin_type",
                None,
                format!("unknown margin type: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingCancel,
}

impl OrderStatus {
    /// Status transitions form a DAG; terminal states are evicted from the active index.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Whether `self -> next` is a legal transition per the status DAG in the data model.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            New => matches!(
                next,
                PartiallyFilled | Filled | Canceled | Rejected | Expired
            ),
            PartiallyFilled => matches!(next, Filled | Canceled | PendingCancel),
            PendingCancel => matches!(next, Canceled | Filled),
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            "PENDING_CANCEL" => Ok(OrderStatus::PendingCancel),
            other => Err(EngineError::invalid_request(
                "parse_order_status",
                None,
                format!("unknown order status: {other}"),
            )),
        }
    }
}

/// A freshly produced, read-only view of a tradable instrument. Never mutated after
/// construction (see data model §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub spot_price: f64,
    pub futures_price: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
    pub volume_24h: f64,
    pub best_bid: f64,
    pub best_ask: f64,
}

impl InstrumentSnapshot {
    pub fn basis(&self) -> f64 {
        (self.futures_price - self.spot_price) / self.spot_price
    }

    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    /// Liquidity score in [0, 1]: volume-weighted, clamped. A crude composite used
    /// purely for instrument ranking, not for sizing (sizing uses book depth directly).
    pub fn liquidity_score(&self) -> f64 {
        let volume_component = (self.volume_24h * self.spot_price / 1.0e8).min(1.0);
        let spread_component = if self.spot_price > 0.0 {
            (1.0 - (self.spread() / self.spot_price) * 1000.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        ((volume_component + spread_component) / 2.0).clamp(0.0, 1.0)
    }

    pub fn seconds_to_funding(&self, now: i64) -> i64 {
        self.next_funding_time - now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: f64,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    pub close_position: bool,
    pub position_side: PositionSide,
    pub margin_type: MarginType,
    /// Selects the spot vs perpetual-futures surface of the adapter (see spec's Open
    /// Questions: the source's `is_spot` flag is not in the declared request type).
    pub is_spot: bool,
    pub extra_params: HashMap<String, String>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbol.is_empty() {
            return Err(EngineError::invalid_request(
                "order_manager.place",
                None,
                "symbol must not be empty".to_string(),
            ));
        }
        if self.quantity <= 0.0 {
            return Err(EngineError::invalid_request(
                "order_manager.place",
                Some(self.symbol.clone()),
                "quantity must be > 0".to_string(),
            ));
        }
        if self.order_type != OrderType::Market && self.price <= 0.0 {
            return Err(EngineError::invalid_request(
                "order_manager.place",
                Some(self.symbol.clone()),
                "price must be > 0 for non-market orders".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub executed_qty: f64,
    pub avg_fill_price: f64,
    pub commission: f64,
    pub commission_asset: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl OrderRecord {
    pub fn remaining(&self) -> f64 {
        self.request.quantity - self.executed_qty
    }

    /// Invariant 1 (spec.md §8): 0 <= executed <= original, remaining = original - executed.
    pub fn check_fill_invariant(&self) -> bool {
        self.executed_qty >= 0.0
            && self.executed_qty <= self.request.quantity
            && (self.remaining() - (self.request.quantity - self.executed_qty)).abs() < 1e-9
    }

    pub fn apply_status(&mut self, next: OrderStatus, now: i64) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::invariant(
                "order_manager.apply_status",
                Some(self.request.symbol.clone()),
                format!("illegal transition {:?} -> {:?}", self.status, next),
            ));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_round_trips() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let s = side.to_string();
            assert_eq!(OrderSide::from_str(&s).unwrap(), side);
        }
    }

    #[test]
    fn order_type_round_trips() {
        for t in [
            OrderType::Market,
            OrderType::Limit,
            OrderType::PostOnly,
            OrderType::StopMarket,
            OrderType::StopLimit,
            OrderType::TakeProfit,
            OrderType::Liquidation,
        ] {
            assert_eq!(OrderType::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn time_in_force_round_trips() {
        for tif in [TimeInForce::Gtc, TimeInForce::Ioc, TimeInForce::Fok, TimeInForce::Gtx] {
            assert_eq!(TimeInForce::from_str(&tif.to_string()).unwrap(), tif);
        }
    }

    #[test]
    fn position_side_round_trips() {
        for side in [PositionSide::Long, PositionSide::Short, PositionSide::Both] {
            assert_eq!(PositionSide::from_str(&side.to_string()).unwrap(), side);
        }
    }

    #[test]
    fn margin_type_round_trips() {
        for m in [MarginType::Isolated, MarginType::Cross] {
            assert_eq!(MarginType::from_str(&m.to_string()).unwrap(), m);
        }
    }

    #[test]
    fn order_status_round_trips() {
        for s in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
            OrderStatus::PendingCancel,
        ] {
            assert_eq!(OrderStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn unknown_enum_strings_are_invalid_request() {
        assert!(OrderSide::from_str("HOLD").is_err());
        assert!(OrderStatus::from_str("WAT").is_err());
    }

    #[test]
    fn status_dag_allows_documented_transitions_only() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::PendingCancel));
    }

    #[test]
    fn basis_matches_definition() {
        let snap = InstrumentSnapshot {
            symbol: "BTCUSDT".into(),
            spot_price: 50000.0,
            futures_price: 50050.0,
            funding_rate: 0.001,
            next_funding_time: 0,
            volume_24h: 1.0e7,
            best_bid: 49999.0,
            best_ask: 50001.0,
        };
        assert!((snap.basis() - 0.001).abs() < 1e-9);
    }
}
