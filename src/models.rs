//! Domain models for the trading pipeline
//!
//! All prices and cash values use Decimal with a fixed scale of six
//! fractional digits. Floating point appears only in signal strength
//! and z-score computation, never in cash or P&L.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fixed decimal scale for prices, cash, and P&L.
pub const PRICE_SCALE: u32 = 6;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    #[inline(always)]
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Order lifecycle status.
///
/// `PartiallyFilled` is part of the persisted vocabulary but no code
/// path currently produces it; every accepted order fills whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Filled => "filled",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "submitted" => Ok(OrderStatus::Submitted),
            "filled" => Ok(OrderStatus::Filled),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A single price observation from a market data feed. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Mid price when both sides are quoted, otherwise the last trade.
    pub fn mid(&self) -> Decimal {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            ((self.bid + self.ask) / Decimal::TWO).round_dp(PRICE_SCALE)
        } else {
            self.last
        }
    }
}

/// A strategy's intent to trade, with an intensity in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub strength: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>, side: Side, strength: f64) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            side,
            strength,
            timestamp: Utc::now(),
        }
    }
}

/// An order as submitted into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub strategy_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn new_market(
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        strategy_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            strategy_id: strategy_id.into(),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A status transition for an existing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    pub fn new(order_id: Uuid, status: OrderStatus, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            status,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An executed trade at a specific price. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    pub fn new(order: &OrderRequest, price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            filled_at: Utc::now(),
        }
    }
}

/// Signed per-symbol position. Negative quantity means short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_mark: Decimal,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_mark: Decimal::ZERO,
        }
    }

    #[inline(always)]
    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    #[inline(always)]
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    #[inline(always)]
    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Market value of the open position at the last mark.
    pub fn market_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.last_mark
    }
}

/// Point-in-time portfolio totals. Realized P&L is already reflected
/// in cash, so equity is cash plus open market value only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_equity: Decimal,
    pub drawdown_pct: Decimal,
    pub snapshot_at: DateTime<Utc>,
}

/// Risk rule identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRule {
    MaxOrderValue,
    MaxPositionSize,
    MaxDrawdown,
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskRule::MaxOrderValue => "MAX_ORDER_VALUE",
            RiskRule::MaxPositionSize => "MAX_POSITION_SIZE",
            RiskRule::MaxDrawdown => "MAX_DRAWDOWN",
        };
        write!(f, "{s}")
    }
}

/// A pre-trade check failure for a specific order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreach {
    pub rule: RiskRule,
    pub message: String,
    pub order_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl RiskBreach {
    pub fn new(rule: RiskRule, order_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            order_id,
            timestamp: Utc::now(),
        }
    }
}

/// Routing key for the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Tick,
    Signal,
    OrderRequest,
    OrderUpdate,
    Fill,
    PositionUpdate,
    RiskBreach,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Tick => "tick",
            EventType::Signal => "signal",
            EventType::OrderRequest => "order_request",
            EventType::OrderUpdate => "order_update",
            EventType::Fill => "fill",
            EventType::PositionUpdate => "position_update",
            EventType::RiskBreach => "risk_breach",
        };
        write!(f, "{s}")
    }
}

/// Closed tagged union of everything that can ride the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Tick(Tick),
    Signal(Signal),
    OrderRequest(OrderRequest),
    OrderUpdate(OrderUpdate),
    Fill(Fill),
    Position(Position),
    RiskBreach(RiskBreach),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Tick(_) => EventType::Tick,
            EventPayload::Signal(_) => EventType::Signal,
            EventPayload::OrderRequest(_) => EventType::OrderRequest,
            EventPayload::OrderUpdate(_) => EventType::OrderUpdate,
            EventPayload::Fill(_) => EventType::Fill,
            EventPayload::Position(_) => EventType::PositionUpdate,
            EventPayload::RiskBreach(_) => EventType::RiskBreach,
        }
    }
}

/// Envelope delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_type: payload.event_type(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn tick(tick: Tick) -> Self {
        Self::new(EventPayload::Tick(tick))
    }

    pub fn signal(signal: Signal) -> Self {
        Self::new(EventPayload::Signal(signal))
    }

    pub fn order_request(order: OrderRequest) -> Self {
        Self::new(EventPayload::OrderRequest(order))
    }

    pub fn order_update(update: OrderUpdate) -> Self {
        Self::new(EventPayload::OrderUpdate(update))
    }

    pub fn fill(fill: Fill) -> Self {
        Self::new(EventPayload::Fill(fill))
    }

    pub fn position(position: Position) -> Self {
        Self::new(EventPayload::Position(position))
    }

    pub fn risk_breach(breach: RiskBreach) -> Self {
        Self::new(EventPayload::RiskBreach(breach))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn mid_prefers_quoted_sides() {
        let tick = Tick {
            symbol: "ACME".to_string(),
            last: dec!(100),
            bid: dec!(99.95),
            ask: dec!(100.05),
            volume: 500,
            timestamp: Utc::now(),
        };
        assert_eq!(tick.mid(), dec!(100));
    }

    #[test]
    fn mid_falls_back_to_last() {
        let tick = Tick {
            symbol: "ACME".to_string(),
            last: dec!(101.5),
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            volume: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(tick.mid(), dec!(101.5));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Filled,
            OrderStatus::PartiallyFilled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }

    #[test]
    fn event_type_follows_payload() {
        let order = OrderRequest::new_market("ACME", Side::Buy, 10, "test");
        let event = Event::order_request(order);
        assert_eq!(event.event_type, EventType::OrderRequest);
    }
}
