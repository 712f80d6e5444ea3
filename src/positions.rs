//! Position and P&L tracking
//!
//! Maintains per-symbol positions, the cash balance, and peak equity.
//! Fills mutate positions and cash; ticks mark positions to market.
//! State is only mutated from bus handlers; readers (risk manager,
//! API) get cloned snapshots.

use futures_util::FutureExt;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::error::TradingError;
use crate::models::{
    Event, EventPayload, EventType, Fill, PortfolioSnapshot, Position, Tick, PRICE_SCALE,
};

pub struct PositionTracker {
    positions: RwLock<HashMap<String, Position>>,
    cash: RwLock<Decimal>,
    peak_equity: RwLock<Decimal>,
    initial_cash: Decimal,
    shutdown: Arc<Notify>,
}

impl PositionTracker {
    pub fn new(initial_cash: Decimal, shutdown: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            positions: RwLock::new(HashMap::new()),
            cash: RwLock::new(initial_cash),
            peak_equity: RwLock::new(initial_cash),
            initial_cash,
            shutdown,
        })
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!(initial_cash = %self.initial_cash, "position tracker started");

        let tracker = Arc::clone(&self);
        let fill_bus = Arc::clone(bus);
        bus.subscribe(EventType::Fill, "position_tracker.on_fill", move |event| {
            let tracker = Arc::clone(&tracker);
            let bus = Arc::clone(&fill_bus);
            async move { tracker.on_fill(&bus, event).await }.boxed()
        });

        bus.subscribe(EventType::Tick, "position_tracker.on_tick", move |event| {
            let tracker = Arc::clone(&self);
            async move { tracker.on_tick(event) }.boxed()
        });
    }

    pub fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::Fill, "position_tracker.on_fill");
        bus.unsubscribe(EventType::Tick, "position_tracker.on_tick");
    }

    async fn on_fill(&self, bus: &EventBus, event: Event) -> anyhow::Result<()> {
        let EventPayload::Fill(fill) = event.payload else {
            return Ok(());
        };
        let position = match self.apply_fill(&fill) {
            Ok(position) => position,
            Err(err @ TradingError::Fatal(_)) => {
                error!(error = %err, "position arithmetic overflow, shutting down");
                self.shutdown.notify_waiters();
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            symbol = %position.symbol,
            quantity = position.quantity,
            avg_entry = %position.avg_entry_price,
            realized = %position.realized_pnl,
            "position updated"
        );

        bus.publish(Event::position(position)).await;
        Ok(())
    }

    fn on_tick(&self, event: Event) -> anyhow::Result<()> {
        let EventPayload::Tick(tick) = event.payload else {
            return Ok(());
        };
        self.mark(&tick);
        Ok(())
    }

    /// Apply a fill to the book. Fills are authoritative: one with an
    /// unknown order id is still applied.
    ///
    /// Cash moves by the signed notional only; realized P&L is implicit
    /// in that delta and tracked per position for reporting.
    pub fn apply_fill(&self, fill: &Fill) -> crate::error::Result<Position> {
        if fill.quantity <= 0 || fill.price <= Decimal::ZERO {
            warn!(order_id = %fill.order_id, "dropping malformed fill");
            return Err(TradingError::Validation(format!(
                "fill for {} has non-positive quantity or price",
                fill.symbol
            )));
        }

        let signed = fill.side.sign() * fill.quantity;
        let price = fill.price;

        {
            let mut cash = self.cash.write();
            *cash -= Decimal::from(signed) * price;
        }

        let position = {
            let mut positions = self.positions.write();
            let pos = positions
                .entry(fill.symbol.clone())
                .or_insert_with(|| Position::flat(fill.symbol.clone()));

            if pos.quantity == 0 || pos.quantity.signum() == signed.signum() {
                // Opening or adding: blend the average entry price.
                let held = Decimal::from(pos.quantity.abs());
                let added = Decimal::from(fill.quantity);
                pos.avg_entry_price =
                    ((held * pos.avg_entry_price + added * price) / (held + added))
                        .round_dp(PRICE_SCALE);
                pos.quantity = pos.quantity.checked_add(signed).ok_or_else(|| {
                    TradingError::Fatal(format!("position quantity overflow for {}", fill.symbol))
                })?;
            } else if fill.quantity <= pos.quantity.abs() {
                // Reducing or closing: realize against the average entry.
                let closed = Decimal::from(fill.quantity);
                let direction = Decimal::from(pos.quantity.signum());
                pos.realized_pnl = (pos.realized_pnl
                    + closed * (price - pos.avg_entry_price) * direction)
                    .round_dp(PRICE_SCALE);
                pos.quantity += signed;
                if pos.quantity == 0 {
                    pos.avg_entry_price = Decimal::ZERO;
                }
            } else {
                // Flipping through zero: close the held quantity, open
                // the remainder on the other side at the fill price.
                let closed = Decimal::from(pos.quantity.abs());
                let direction = Decimal::from(pos.quantity.signum());
                pos.realized_pnl = (pos.realized_pnl
                    + closed * (price - pos.avg_entry_price) * direction)
                    .round_dp(PRICE_SCALE);
                pos.quantity = pos.quantity.checked_add(signed).ok_or_else(|| {
                    TradingError::Fatal(format!("position quantity overflow for {}", fill.symbol))
                })?;
                pos.avg_entry_price = price;
            }

            let mark = if pos.last_mark > Decimal::ZERO {
                pos.last_mark
            } else {
                price
            };
            pos.last_mark = mark;
            pos.unrealized_pnl = (Decimal::from(pos.quantity) * (mark - pos.avg_entry_price))
                .round_dp(PRICE_SCALE);

            pos.clone()
        };

        self.raise_peak();
        Ok(position)
    }

    /// Mark the symbol's position to the tick's mid price. Quiet:
    /// ticks are high frequency, mark updates surface via snapshots.
    pub fn mark(&self, tick: &Tick) {
        let mid = tick.mid();
        if mid <= Decimal::ZERO {
            warn!(symbol = %tick.symbol, "ignoring tick with non-positive price");
            return;
        }

        {
            let mut positions = self.positions.write();
            if let Some(pos) = positions.get_mut(&tick.symbol) {
                pos.last_mark = mid;
                pos.unrealized_pnl = (Decimal::from(pos.quantity)
                    * (mid - pos.avg_entry_price))
                    .round_dp(PRICE_SCALE);
            }
        }

        self.raise_peak();
    }

    fn equity(&self) -> Decimal {
        let open_value: Decimal = self
            .positions
            .read()
            .values()
            .map(Position::market_value)
            .sum();
        *self.cash.read() + open_value
    }

    fn raise_peak(&self) {
        let equity = self.equity();
        let mut peak = self.peak_equity.write();
        if equity > *peak {
            *peak = equity;
        }
    }

    pub fn get_position(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn cash(&self) -> Decimal {
        *self.cash.read()
    }

    /// Immutable point-in-time view of the portfolio.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let (total_unrealized, total_realized, open_value) = {
            let positions = self.positions.read();
            let unrealized: Decimal = positions.values().map(|p| p.unrealized_pnl).sum();
            let realized: Decimal = positions.values().map(|p| p.realized_pnl).sum();
            let open: Decimal = positions.values().map(Position::market_value).sum();
            (unrealized, realized, open)
        };
        let cash = *self.cash.read();
        let total_equity = cash + open_value;

        let drawdown_pct = {
            let mut peak = self.peak_equity.write();
            if total_equity > *peak {
                *peak = total_equity;
            }
            if *peak > Decimal::ZERO {
                ((*peak - total_equity) / *peak).round_dp(PRICE_SCALE)
            } else {
                Decimal::ZERO
            }
        };

        crate::metrics::EQUITY.set(total_equity.to_f64().unwrap_or(0.0));
        crate::metrics::PNL_REALIZED.set(total_realized.to_f64().unwrap_or(0.0));
        crate::metrics::PNL_UNREALIZED.set(total_unrealized.to_f64().unwrap_or(0.0));

        PortfolioSnapshot {
            cash,
            total_unrealized_pnl: total_unrealized,
            total_realized_pnl: total_realized,
            total_equity,
            drawdown_pct,
            snapshot_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn tracker() -> Arc<PositionTracker> {
        PositionTracker::new(dec!(100000), Arc::new(Notify::new()))
    }

    fn fill(symbol: &str, side: Side, quantity: i64, price: Decimal) -> Fill {
        Fill {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            filled_at: Utc::now(),
        }
    }

    fn tick(symbol: &str, price: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            last: price,
            bid: price,
            ask: price,
            volume: 1000,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn buy_opens_long() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 100, dec!(150))).unwrap();

        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, 100);
        assert_eq!(pos.avg_entry_price, dec!(150));
        assert_eq!(tracker.cash(), dec!(85000));
    }

    #[test]
    fn sell_opens_short() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Sell, 50, dec!(150))).unwrap();

        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, -50);
        assert_eq!(pos.avg_entry_price, dec!(150));
        assert_eq!(tracker.cash(), dec!(107500));
    }

    #[test]
    fn adding_blends_average_entry() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 10, dec!(100))).unwrap();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 10, dec!(110))).unwrap();

        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, 20);
        assert_eq!(pos.avg_entry_price, dec!(105));
    }

    #[test]
    fn round_trip_realizes_pnl() {
        // Buy 10 at 100.05, sell 10 at 109.945: realized 98.95 and the
        // cash delta carries it implicitly.
        let tracker = tracker();
        tracker.apply_fill(&fill("BAR", Side::Buy, 10, dec!(100.05))).unwrap();
        tracker.apply_fill(&fill("BAR", Side::Sell, 10, dec!(109.945))).unwrap();

        let pos = tracker.get_position("BAR").unwrap();
        assert_eq!(pos.quantity, 0);
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, dec!(98.95));
        assert_eq!(tracker.cash(), dec!(100098.95));
    }

    #[test]
    fn short_round_trip_realizes_pnl() {
        let tracker = tracker();
        tracker.apply_fill(&fill("BAR", Side::Sell, 10, dec!(110))).unwrap();
        tracker.apply_fill(&fill("BAR", Side::Buy, 10, dec!(100))).unwrap();

        let pos = tracker.get_position("BAR").unwrap();
        assert_eq!(pos.quantity, 0);
        assert_eq!(pos.realized_pnl, dec!(100));
        assert_eq!(tracker.cash(), dec!(100100));
    }

    #[test]
    fn partial_reduce_keeps_average() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 10, dec!(100))).unwrap();
        tracker.apply_fill(&fill("AAPL", Side::Sell, 4, dec!(105))).unwrap();

        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, 6);
        assert_eq!(pos.avg_entry_price, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(20));
    }

    #[test]
    fn flip_through_zero_realizes_closing_leg_only() {
        // +5 @ 100, sell 8 at 109.945: close 5 for 49.725 realized,
        // remainder opens -3 @ 109.945.
        let tracker = tracker();
        tracker.apply_fill(&fill("ACME", Side::Buy, 5, dec!(100))).unwrap();
        tracker.apply_fill(&fill("ACME", Side::Sell, 8, dec!(109.945))).unwrap();

        let pos = tracker.get_position("ACME").unwrap();
        assert_eq!(pos.quantity, -3);
        assert_eq!(pos.avg_entry_price, dec!(109.945));
        assert_eq!(pos.realized_pnl, dec!(49.725));
    }

    #[test]
    fn tick_updates_unrealized() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 100, dec!(150))).unwrap();
        tracker.mark(&tick("AAPL", dec!(155)));

        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.last_mark, dec!(155));
        assert_eq!(pos.unrealized_pnl, dec!(500));
    }

    #[test]
    fn tick_for_unknown_symbol_is_ignored() {
        let tracker = tracker();
        tracker.mark(&tick("ZZZ", dec!(10)));
        assert!(tracker.get_position("ZZZ").is_none());
    }

    #[test]
    fn avg_entry_zero_iff_flat() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 10, dec!(100))).unwrap();
        let pos = tracker.get_position("AAPL").unwrap();
        assert!(pos.avg_entry_price > Decimal::ZERO);

        tracker.apply_fill(&fill("AAPL", Side::Sell, 10, dec!(101))).unwrap();
        let pos = tracker.get_position("AAPL").unwrap();
        assert_eq!(pos.quantity, 0);
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
    }

    #[test]
    fn snapshot_totals_and_drawdown() {
        let tracker = tracker();
        tracker.apply_fill(&fill("AAPL", Side::Buy, 10, dec!(100))).unwrap();
        tracker.mark(&tick("AAPL", dec!(110)));

        let snap = tracker.snapshot();
        assert_eq!(snap.total_unrealized_pnl, dec!(100));
        assert_eq!(snap.total_equity, dec!(100000) - dec!(1000) + dec!(1100));
        assert_eq!(snap.drawdown_pct, Decimal::ZERO);

        // Price collapses; equity falls below the peak.
        tracker.mark(&tick("AAPL", dec!(50)));
        let snap = tracker.snapshot();
        assert_eq!(snap.total_equity, dec!(99000) + dec!(500));
        assert!(snap.drawdown_pct > Decimal::ZERO);
    }

    #[test]
    fn malformed_fill_is_rejected() {
        let tracker = tracker();
        let bad = fill("AAPL", Side::Buy, 0, dec!(100));
        assert!(tracker.apply_fill(&bad).is_err());
        assert!(tracker.get_position("AAPL").is_none());
        assert_eq!(tracker.cash(), dec!(100000));
    }
}
