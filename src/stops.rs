//! Stop-loss management
//!
//! Arms a protective stop after every fill and fires a full-strength
//! closing signal when a tick trades through it. A fired stop latches
//! until the position changes again, so a gapping feed cannot spray
//! duplicate exits.

use futures_util::FutureExt;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::models::{Event, EventPayload, EventType, Side, Signal, PRICE_SCALE};
use crate::positions::PositionTracker;

#[derive(Debug, Clone)]
struct StopLevel {
    stop_price: Decimal,
    side_to_close: Side,
}

pub struct StopLossManager {
    tracker: Arc<PositionTracker>,
    stop_loss_pct: Decimal,
    stops: RwLock<HashMap<String, StopLevel>>,
    triggered: RwLock<HashSet<String>>,
}

impl StopLossManager {
    pub fn new(tracker: Arc<PositionTracker>, stop_loss_pct: Decimal) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            stop_loss_pct,
            stops: RwLock::new(HashMap::new()),
            triggered: RwLock::new(HashSet::new()),
        })
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!(pct = %self.stop_loss_pct, "stop loss manager started");

        let stops = Arc::clone(&self);
        bus.subscribe(EventType::Fill, "stop_loss.on_fill", move |event| {
            let stops = Arc::clone(&stops);
            async move {
                stops.on_fill(event);
                Ok(())
            }
            .boxed()
        });

        let tick_bus = Arc::clone(bus);
        bus.subscribe(EventType::Tick, "stop_loss.on_tick", move |event| {
            let stops = Arc::clone(&self);
            let bus = Arc::clone(&tick_bus);
            async move { stops.on_tick(&bus, event).await }.boxed()
        });
    }

    pub fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::Fill, "stop_loss.on_fill");
        bus.unsubscribe(EventType::Tick, "stop_loss.on_tick");
    }

    fn on_fill(&self, event: Event) {
        let EventPayload::Fill(fill) = event.payload else {
            return;
        };

        let Some(position) = self.tracker.get_position(&fill.symbol) else {
            return;
        };
        if position.is_flat() {
            // Position closed; disarm and allow future re-triggering.
            self.stops.write().remove(&fill.symbol);
            self.triggered.write().remove(&fill.symbol);
            return;
        }

        let (stop_price, side_to_close) = if position.is_long() {
            (
                (position.avg_entry_price * (Decimal::ONE - self.stop_loss_pct))
                    .round_dp(PRICE_SCALE),
                Side::Sell,
            )
        } else {
            (
                (position.avg_entry_price * (Decimal::ONE + self.stop_loss_pct))
                    .round_dp(PRICE_SCALE),
                Side::Buy,
            )
        };

        info!(
            symbol = %fill.symbol,
            stop_price = %stop_price,
            side_to_close = %side_to_close,
            "stop level set"
        );
        self.stops.write().insert(
            fill.symbol.clone(),
            StopLevel {
                stop_price,
                side_to_close,
            },
        );
        self.triggered.write().remove(&fill.symbol);
    }

    async fn on_tick(&self, bus: &EventBus, event: Event) -> anyhow::Result<()> {
        let EventPayload::Tick(tick) = event.payload else {
            return Ok(());
        };

        let stop = {
            let stops = self.stops.read();
            match stops.get(&tick.symbol) {
                Some(stop) => stop.clone(),
                None => return Ok(()),
            }
        };
        if self.triggered.read().contains(&tick.symbol) {
            return Ok(());
        }

        let breached = match stop.side_to_close {
            Side::Sell => tick.last <= stop.stop_price,
            Side::Buy => tick.last >= stop.stop_price,
        };
        if !breached {
            return Ok(());
        }

        self.triggered.write().insert(tick.symbol.clone());
        warn!(
            symbol = %tick.symbol,
            price = %tick.last,
            stop_price = %stop.stop_price,
            "stop loss triggered"
        );

        bus.publish(Event::signal(Signal::new(
            "stop_loss",
            tick.symbol.clone(),
            stop.side_to_close,
            1.0,
        )))
        .await;
        Ok(())
    }
}
