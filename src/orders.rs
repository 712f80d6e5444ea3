//! Order management and simulated execution
//!
//! Converts signals into market orders and fills them after a fixed
//! decision window. The window exists because risk sees the same
//! ORDER_REQUEST concurrently: a rejection arriving inside the window
//! wins, otherwise the order fills at the last price with slippage
//! applied (buys above, sells below).

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::models::{
    Event, EventPayload, EventType, Fill, OrderRequest, OrderStatus, OrderUpdate, Side,
    PRICE_SCALE,
};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Shares per full-strength signal.
    pub max_qty_per_signal: i64,
    /// How long to wait for a risk decision before filling.
    pub risk_wait: Duration,
    /// Simulated slippage in basis points.
    pub slippage_bps: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_qty_per_signal: 100,
            risk_wait: Duration::from_millis(50),
            slippage_bps: 5,
        }
    }
}

pub struct OrderManager {
    config: ExecutionConfig,
    orders: RwLock<HashMap<Uuid, OrderRequest>>,
    last_prices: RwLock<HashMap<String, Decimal>>,
    pending: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl OrderManager {
    pub fn new(config: ExecutionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            orders: RwLock::new(HashMap::new()),
            last_prices: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!(
            max_qty = self.config.max_qty_per_signal,
            risk_wait_ms = self.config.risk_wait.as_millis() as u64,
            slippage_bps = self.config.slippage_bps,
            "order manager started"
        );

        let manager = Arc::clone(&self);
        let signal_bus = Arc::clone(bus);
        bus.subscribe(EventType::Signal, "order_manager.on_signal", move |event| {
            let manager = Arc::clone(&manager);
            let bus = Arc::clone(&signal_bus);
            async move { manager.on_signal(bus, event).await }.boxed()
        });

        let manager = Arc::clone(&self);
        bus.subscribe(EventType::Tick, "order_manager.on_tick", move |event| {
            let manager = Arc::clone(&manager);
            async move {
                if let EventPayload::Tick(tick) = event.payload {
                    if tick.last > Decimal::ZERO {
                        manager.last_prices.write().insert(tick.symbol, tick.last);
                    }
                }
                Ok(())
            }
            .boxed()
        });

        bus.subscribe(
            EventType::OrderUpdate,
            "order_manager.on_order_update",
            move |event| {
                let manager = Arc::clone(&self);
                async move {
                    manager.on_order_update(event);
                    Ok(())
                }
                .boxed()
            },
        );
    }

    /// Unsubscribe and cancel every pending fill decision. Cancelled
    /// orders are marked and announced so persistence observes the
    /// terminal state.
    pub async fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::Signal, "order_manager.on_signal");
        bus.unsubscribe(EventType::Tick, "order_manager.on_tick");
        bus.unsubscribe(EventType::OrderUpdate, "order_manager.on_order_update");

        let pending: Vec<(Uuid, JoinHandle<()>)> = self.pending.lock().drain().collect();
        for (order_id, handle) in pending {
            handle.abort();
            if self.transition(order_id, OrderStatus::Cancelled) {
                bus.publish(Event::order_update(OrderUpdate::new(
                    order_id,
                    OrderStatus::Cancelled,
                    "shutdown",
                )))
                .await;
            }
        }
    }

    async fn on_signal(self: Arc<Self>, bus: Arc<EventBus>, event: Event) -> anyhow::Result<()> {
        let EventPayload::Signal(signal) = event.payload else {
            return Ok(());
        };
        if !signal.strength.is_finite() || signal.strength <= 0.0 || signal.strength > 1.0 {
            warn!(
                strategy = %signal.strategy_id,
                strength = signal.strength,
                "dropping signal with invalid strength"
            );
            return Ok(());
        }

        let quantity = (signal.strength * self.config.max_qty_per_signal as f64).round() as i64;
        if quantity == 0 {
            debug!(strategy = %signal.strategy_id, "signal too weak, dropped");
            return Ok(());
        }

        let order = OrderRequest::new_market(
            signal.symbol.clone(),
            signal.side,
            quantity,
            signal.strategy_id.clone(),
        );
        let order_id = order.id;
        self.orders.write().insert(order_id, order.clone());
        crate::metrics::ORDERS.inc();

        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity,
            "order created"
        );

        bus.publish(Event::order_request(order)).await;

        // Arm the fill decision timer; a rejection observed inside the
        // window disarms it.
        let manager = Arc::clone(&self);
        let wait = self.config.risk_wait;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            manager.decide_fill(&bus, order_id, &signal.symbol).await;
        });
        self.pending.lock().insert(order_id, handle);
        Ok(())
    }

    async fn decide_fill(&self, bus: &EventBus, order_id: Uuid, symbol: &str) {
        self.pending.lock().remove(&order_id);

        let order = {
            let orders = self.orders.read();
            match orders.get(&order_id) {
                Some(order) if order.status == OrderStatus::Pending => order.clone(),
                // Rejected inside the window, or unknown.
                _ => return,
            }
        };

        let Some(last) = self.last_prices.read().get(symbol).copied() else {
            warn!(order_id = %order_id, symbol, "no price seen yet, cancelling order");
            self.transition(order_id, OrderStatus::Cancelled);
            bus.publish(Event::order_update(OrderUpdate::new(
                order_id,
                OrderStatus::Cancelled,
                "no market data for symbol",
            )))
            .await;
            return;
        };

        let slippage = Decimal::new(self.config.slippage_bps, 4);
        let factor = match order.side {
            Side::Buy => Decimal::ONE + slippage,
            Side::Sell => Decimal::ONE - slippage,
        };
        let fill_price = (last * factor).round_dp(PRICE_SCALE);

        self.transition(order_id, OrderStatus::Submitted);
        self.transition(order_id, OrderStatus::Filled);

        let fill = Fill::new(&order, fill_price);
        crate::metrics::FILLS.inc();
        info!(
            order_id = %order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            price = %fill.price,
            quantity = fill.quantity,
            "order filled"
        );
        bus.publish(Event::fill(fill)).await;
    }

    fn on_order_update(&self, event: Event) {
        let EventPayload::OrderUpdate(update) = event.payload else {
            return;
        };
        if update.status != OrderStatus::Rejected {
            return;
        }
        if self.transition(update.order_id, OrderStatus::Rejected) {
            if let Some(handle) = self.pending.lock().remove(&update.order_id) {
                handle.abort();
            }
            info!(order_id = %update.order_id, reason = %update.reason, "order rejected");
        }
    }

    /// Move an order to `status` unless it is already terminal.
    /// Returns whether the transition happened.
    fn transition(&self, order_id: Uuid, status: OrderStatus) -> bool {
        let mut orders = self.orders.write();
        match orders.get_mut(&order_id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn get_order(&self, order_id: Uuid) -> Option<OrderRequest> {
        self.orders.read().get(&order_id).cloned()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Signal, Tick};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<EventBus>, Arc<OrderManager>) {
        let bus = Arc::new(EventBus::new());
        let manager = OrderManager::new(ExecutionConfig::default());
        Arc::clone(&manager).start(&bus);
        (bus, manager)
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

    async fn let_timers_run() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn signal_becomes_order_and_fill() {
        let (bus, manager) = setup();
        bus.publish(Event::tick(tick("ACME", dec!(90)))).await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, 1.0)))
            .await;

        let requests = bus.history_of(EventType::OrderRequest);
        assert_eq!(requests.len(), 1);
        let EventPayload::OrderRequest(order) = &requests[0].payload else {
            panic!("expected order request");
        };
        assert_eq!(order.quantity, 100);

        let_timers_run().await;

        let fills = bus.history_of(EventType::Fill);
        assert_eq!(fills.len(), 1);
        let EventPayload::Fill(fill) = &fills[0].payload else {
            panic!("expected fill");
        };
        // 90 * 1.0005 with 5 bps of slippage.
        assert_eq!(fill.price, dec!(90.045));
        assert_eq!(fill.quantity, 100);
        assert_eq!(
            manager.get_order(order.id).unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sell_fill_slips_below_last() {
        let (bus, _manager) = setup();
        bus.publish(Event::tick(tick("BAR", dec!(110)))).await;
        bus.publish(Event::signal(Signal::new("mr", "BAR", Side::Sell, 0.1)))
            .await;

        let_timers_run().await;

        let fills = bus.history_of(EventType::Fill);
        assert_eq!(fills.len(), 1);
        let EventPayload::Fill(fill) = &fills[0].payload else {
            panic!("expected fill");
        };
        assert_eq!(fill.price, dec!(109.945));
        assert_eq!(fill.quantity, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_inside_window_prevents_fill() {
        let (bus, manager) = setup();
        bus.publish(Event::tick(tick("ACME", dec!(100)))).await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, 0.5)))
            .await;

        let order = manager.orders().pop().expect("order exists");
        bus.publish(Event::order_update(OrderUpdate::new(
            order.id,
            OrderStatus::Rejected,
            "over limit",
        )))
        .await;

        let_timers_run().await;

        assert!(bus.history_of(EventType::Fill).is_empty());
        assert_eq!(
            manager.get_order(order.id).unwrap().status,
            OrderStatus::Rejected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn order_before_first_tick_is_cancelled() {
        let (bus, manager) = setup();
        bus.publish(Event::signal(Signal::new("mr", "NEW", Side::Buy, 1.0)))
            .await;

        let_timers_run().await;

        assert!(bus.history_of(EventType::Fill).is_empty());
        let order = manager.orders().pop().expect("order exists");
        assert_eq!(order.status, OrderStatus::Cancelled);

        let updates = bus.history_of(EventType::OrderUpdate);
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn weak_signal_is_dropped() {
        let (bus, manager) = setup();
        bus.publish(Event::tick(tick("ACME", dec!(100)))).await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, 0.001)))
            .await;

        assert!(manager.orders().is_empty());
        assert!(bus.history_of(EventType::OrderRequest).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_strength_is_dropped() {
        let (bus, manager) = setup();
        bus.publish(Event::tick(tick("ACME", dec!(100)))).await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, f64::NAN)))
            .await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, 1.7)))
            .await;

        assert!(manager.orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_orders() {
        let (bus, manager) = setup();
        bus.publish(Event::tick(tick("ACME", dec!(100)))).await;
        bus.publish(Event::signal(Signal::new("mr", "ACME", Side::Buy, 1.0)))
            .await;

        manager.stop(&bus).await;
        let_timers_run().await;

        assert!(bus.history_of(EventType::Fill).is_empty());
        let order = manager.orders().pop().expect("order exists");
        assert_eq!(order.status, OrderStatus::Cancelled);
    }
}
