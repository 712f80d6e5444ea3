//! Pre-trade risk checks
//!
//! Gates every ORDER_REQUEST against order value, projected position
//! size, and portfolio drawdown. On a breach it publishes a
//! RISK_BREACH plus an ORDER_UPDATE(rejected); on a pass it stays
//! silent and the order manager proceeds to fill after its decision
//! window. Reads position state, never mutates it.

use futures_util::FutureExt;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::models::{
    Event, EventPayload, EventType, OrderRequest, OrderStatus, OrderType, OrderUpdate, RiskBreach,
    RiskRule, Side,
};
use crate::positions::PositionTracker;

/// Configurable limits, all enforced per order.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_order_value: Decimal,
    pub max_position_size: i64,
    pub max_drawdown_pct: Decimal,
}

pub struct RiskManager {
    limits: RiskLimits,
    tracker: Arc<PositionTracker>,
    last_prices: RwLock<HashMap<String, Decimal>>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, tracker: Arc<PositionTracker>) -> Arc<Self> {
        Arc::new(Self {
            limits,
            tracker,
            last_prices: RwLock::new(HashMap::new()),
        })
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!(
            max_order_value = %self.limits.max_order_value,
            max_position_size = self.limits.max_position_size,
            max_drawdown_pct = %self.limits.max_drawdown_pct,
            "risk manager started"
        );

        let risk = Arc::clone(&self);
        let request_bus = Arc::clone(bus);
        bus.subscribe(
            EventType::OrderRequest,
            "risk_manager.on_order_request",
            move |event| {
                let risk = Arc::clone(&risk);
                let bus = Arc::clone(&request_bus);
                async move { risk.on_order_request(&bus, event).await }.boxed()
            },
        );

        bus.subscribe(EventType::Tick, "risk_manager.on_tick", move |event| {
            let risk = Arc::clone(&self);
            async move {
                if let EventPayload::Tick(tick) = event.payload {
                    if tick.last > Decimal::ZERO {
                        risk.last_prices.write().insert(tick.symbol, tick.last);
                    }
                }
                Ok(())
            }
            .boxed()
        });
    }

    pub fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::OrderRequest, "risk_manager.on_order_request");
        bus.unsubscribe(EventType::Tick, "risk_manager.on_tick");
    }

    async fn on_order_request(&self, bus: &EventBus, event: Event) -> anyhow::Result<()> {
        let EventPayload::OrderRequest(order) = event.payload else {
            return Ok(());
        };
        if let Some(breach) = self.check_order(&order) {
            warn!(
                order_id = %order.id,
                rule = %breach.rule,
                reason = %breach.message,
                "order rejected"
            );
            crate::metrics::RISK_REJECTIONS
                .with_label_values(&[&breach.rule.to_string()])
                .inc();

            let update = OrderUpdate::new(order.id, OrderStatus::Rejected, breach.message.clone());
            bus.publish(Event::risk_breach(breach)).await;
            bus.publish(Event::order_update(update)).await;
        }
        Ok(())
    }

    /// Run all rules against a live snapshot. `None` means the order
    /// passes.
    pub fn check_order(&self, order: &OrderRequest) -> Option<RiskBreach> {
        // Rule 1: order notional against the reference price.
        let reference = match order.order_type {
            OrderType::Limit => order.limit_price,
            OrderType::Market => self.last_prices.read().get(&order.symbol).copied(),
        };
        let Some(reference) = reference else {
            return Some(RiskBreach::new(
                RiskRule::MaxOrderValue,
                order.id,
                format!("no reference price for {}", order.symbol),
            ));
        };
        let order_value = Decimal::from(order.quantity) * reference;
        if order_value > self.limits.max_order_value {
            return Some(RiskBreach::new(
                RiskRule::MaxOrderValue,
                order.id,
                format!(
                    "order value {} exceeds limit {}",
                    order_value, self.limits.max_order_value
                ),
            ));
        }

        // Rule 2: projected signed position size.
        let current = self
            .tracker
            .get_position(&order.symbol)
            .map(|p| p.quantity)
            .unwrap_or(0);
        let delta = match order.side {
            Side::Buy => order.quantity,
            Side::Sell => -order.quantity,
        };
        let projected = current.saturating_add(delta);
        if projected.abs() > self.limits.max_position_size {
            return Some(RiskBreach::new(
                RiskRule::MaxPositionSize,
                order.id,
                format!(
                    "projected position {} exceeds limit {}",
                    projected, self.limits.max_position_size
                ),
            ));
        }

        // Rule 3: drawdown from peak equity must stay strictly under
        // the limit.
        let snapshot = self.tracker.snapshot();
        if snapshot.drawdown_pct >= self.limits.max_drawdown_pct {
            return Some(RiskBreach::new(
                RiskRule::MaxDrawdown,
                order.id,
                format!(
                    "drawdown {} at or above limit {}",
                    snapshot.drawdown_pct, self.limits.max_drawdown_pct
                ),
            ));
        }

        None
    }
}
