//! Strategy contract and engine
//!
//! Strategies are stateful tick consumers that may emit signals. The
//! engine subscribes to TICK, dispatches each tick to every strategy
//! that cares about the symbol, and publishes whatever signals come
//! back. Strategy arithmetic is pure computation and never suspends;
//! per-strategy ordering follows tick arrival.

mod mean_reversion;
mod pairs;

pub use mean_reversion::MeanReversionStrategy;
pub use pairs::PairsTradingStrategy;

use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

use crate::bus::EventBus;
use crate::models::{Event, EventPayload, EventType, Signal, Tick};

/// A trading strategy. `on_tick` returns zero or more signals; most
/// strategies emit at most one, pair strategies leg two at a time.
pub trait Strategy: Send {
    fn id(&self) -> &str;

    /// Symbols this strategy wants. Empty means every symbol.
    fn symbols(&self) -> &[String];

    fn on_tick(&mut self, tick: &Tick) -> Vec<Signal>;

    /// Clear all rolling state.
    fn reset(&mut self);
}

/// Fixed-capacity FIFO of recent values for rolling statistics.
pub(crate) struct Window {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation (n - 1 denominator).
pub(crate) fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub struct StrategyEngine {
    strategies: Mutex<Vec<Box<dyn Strategy>>>,
}

impl StrategyEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            strategies: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, strategy: Box<dyn Strategy>) {
        info!(strategy = strategy.id(), "strategy registered");
        self.strategies.lock().push(strategy);
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!(count = self.strategies.lock().len(), "strategy engine started");

        let tick_bus = Arc::clone(bus);
        bus.subscribe(EventType::Tick, "strategy_engine.on_tick", move |event| {
            let engine = Arc::clone(&self);
            let bus = Arc::clone(&tick_bus);
            async move { engine.on_tick(&bus, event).await }.boxed()
        });
    }

    pub fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::Tick, "strategy_engine.on_tick");
    }

    async fn on_tick(&self, bus: &EventBus, event: Event) -> anyhow::Result<()> {
        let EventPayload::Tick(tick) = event.payload else {
            return Ok(());
        };

        // Strategy math runs to completion under the lock; publishing
        // happens after it is released.
        let signals: Vec<Signal> = {
            let mut strategies = self.strategies.lock();
            strategies
                .iter_mut()
                .filter(|s| s.symbols().is_empty() || s.symbols().contains(&tick.symbol))
                .flat_map(|s| s.on_tick(&tick))
                .collect()
        };

        for signal in signals {
            info!(
                strategy = %signal.strategy_id,
                symbol = %signal.symbol,
                side = %signal.side,
                strength = signal.strength,
                "signal generated"
            );
            crate::metrics::SIGNALS
                .with_label_values(&[&signal.strategy_id, &signal.side.to_string()])
                .inc();
            bus.publish(Event::signal(signal)).await;
        }
        Ok(())
    }

    /// Reset every registered strategy.
    pub fn reset_all(&self) {
        for strategy in self.strategies.lock().iter_mut() {
            strategy.reset();
        }
    }
}
