//! Pairs trading on a price-ratio z-score
//!
//! Watches two symbols, tracks the ratio of their prices over a
//! rolling window, and trades the spread when it diverges: short the
//! rich leg, long the cheap one. Positions unwind when the ratio
//! converges back inside `exit_z`.

use rust_decimal::prelude::ToPrimitive;

use super::{mean, sample_stdev, Strategy, Window};
use crate::models::{Side, Signal, Tick};

const MIN_STDEV: f64 = 1e-9;

/// Spread state: 0 flat, 1 long A / short B, -1 short A / long B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpreadState {
    Flat,
    LongA,
    ShortA,
}

pub struct PairsTradingStrategy {
    id: String,
    symbols: Vec<String>,
    window_size: usize,
    entry_z: f64,
    exit_z: f64,
    prices_a: Window,
    prices_b: Window,
    latest_a: Option<f64>,
    latest_b: Option<f64>,
    state: SpreadState,
}

impl PairsTradingStrategy {
    pub fn new(
        symbol_a: impl Into<String>,
        symbol_b: impl Into<String>,
        window_size: usize,
        entry_z: f64,
        exit_z: f64,
    ) -> Self {
        Self {
            id: "pairs".to_string(),
            symbols: vec![symbol_a.into(), symbol_b.into()],
            window_size,
            entry_z,
            exit_z,
            prices_a: Window::new(window_size),
            prices_b: Window::new(window_size),
            latest_a: None,
            latest_b: None,
            state: SpreadState::Flat,
        }
    }

    fn signal_pair(&self, side_a: Side, strength: f64) -> Vec<Signal> {
        vec![
            Signal::new(self.id.clone(), self.symbols[0].clone(), side_a, strength),
            Signal::new(
                self.id.clone(),
                self.symbols[1].clone(),
                side_a.opposite(),
                strength,
            ),
        ]
    }

    fn close_pair(&self, strength: f64) -> Vec<Signal> {
        match self.state {
            // Long A / short B unwinds by selling A and buying B.
            SpreadState::LongA => self.signal_pair(Side::Sell, strength),
            SpreadState::ShortA => self.signal_pair(Side::Buy, strength),
            SpreadState::Flat => Vec::new(),
        }
    }
}

impl Strategy for PairsTradingStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn on_tick(&mut self, tick: &Tick) -> Vec<Signal> {
        let Some(price) = tick.last.to_f64() else {
            return Vec::new();
        };

        if tick.symbol == self.symbols[0] {
            self.prices_a.push(price);
            self.latest_a = Some(price);
        } else if tick.symbol == self.symbols[1] {
            self.prices_b.push(price);
            self.latest_b = Some(price);
        } else {
            return Vec::new();
        }

        if !self.prices_a.is_full() || !self.prices_b.is_full() {
            return Vec::new();
        }
        let (Some(latest_a), Some(latest_b)) = (self.latest_a, self.latest_b) else {
            return Vec::new();
        };
        if latest_b == 0.0 {
            return Vec::new();
        }

        let ratios: Vec<f64> = self
            .prices_a
            .iter()
            .zip(self.prices_b.iter())
            .map(|(a, b)| a / b)
            .collect();
        let mu = mean(ratios.iter().copied());
        let sigma = sample_stdev(&ratios);
        if sigma < MIN_STDEV {
            return Vec::new();
        }

        let z = (latest_a / latest_b - mu) / sigma;

        // Exit first: the spread has converged.
        if self.state != SpreadState::Flat && z.abs() < self.exit_z {
            let signals = self.close_pair(z.abs().max(self.exit_z / 2.0).min(1.0));
            self.state = SpreadState::Flat;
            return signals;
        }

        if self.state == SpreadState::Flat {
            let strength = (z.abs() / (2.0 * self.entry_z)).min(1.0);
            if z > self.entry_z {
                // A rich relative to B: short A, long B.
                self.state = SpreadState::ShortA;
                return self.signal_pair(Side::Sell, strength);
            } else if z < -self.entry_z {
                self.state = SpreadState::LongA;
                return self.signal_pair(Side::Buy, strength);
            }
        }

        Vec::new()
    }

    fn reset(&mut self) {
        self.prices_a.clear();
        self.prices_b.clear();
        self.latest_a = None;
        self.latest_b = None;
        self.state = SpreadState::Flat;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn tick(symbol: &str, price: f64) -> Tick {
        let d = Decimal::try_from(price).unwrap();
        Tick {
            symbol: symbol.to_string(),
            last: d,
            bid: d,
            ask: d,
            volume: 100,
            timestamp: Utc::now(),
        }
    }

    fn warm_up(strategy: &mut PairsTradingStrategy, n: usize) {
        // Ratio oscillates tightly around 2.0 so the window has a
        // small nonzero stdev.
        for i in 0..n {
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_tick(&tick("A", 200.0 + wiggle));
            strategy.on_tick(&tick("B", 100.0));
        }
    }

    #[test]
    fn quiet_until_both_windows_fill() {
        let mut strategy = PairsTradingStrategy::new("A", "B", 10, 2.0, 0.5);
        for _ in 0..20 {
            assert!(strategy.on_tick(&tick("A", 200.0)).is_empty());
        }
    }

    #[test]
    fn divergence_shorts_the_rich_leg() {
        let mut strategy = PairsTradingStrategy::new("A", "B", 10, 2.0, 0.5);
        warm_up(&mut strategy, 10);

        // A jumps far above its usual ratio.
        let signals = strategy.on_tick(&tick("A", 230.0));
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].symbol, "A");
        assert_eq!(signals[0].side, Side::Sell);
        assert_eq!(signals[1].symbol, "B");
        assert_eq!(signals[1].side, Side::Buy);
    }

    #[test]
    fn convergence_unwinds_the_spread() {
        let mut strategy = PairsTradingStrategy::new("A", "B", 10, 2.0, 0.5);
        warm_up(&mut strategy, 10);
        assert_eq!(strategy.on_tick(&tick("A", 230.0)).len(), 2);

        // Walk the ratio back toward the mean until the exit fires.
        let mut closed = Vec::new();
        for _ in 0..20 {
            closed = strategy.on_tick(&tick("A", 200.0));
            strategy.on_tick(&tick("B", 100.0));
            if !closed.is_empty() {
                break;
            }
        }
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].symbol, "A");
        assert_eq!(closed[0].side, Side::Buy);
        assert_eq!(closed[1].side, Side::Sell);
    }

    #[test]
    fn ignores_unrelated_symbols() {
        let mut strategy = PairsTradingStrategy::new("A", "B", 4, 2.0, 0.5);
        assert!(strategy.on_tick(&tick("C", 50.0)).is_empty());
    }

    #[test]
    fn reset_goes_flat() {
        let mut strategy = PairsTradingStrategy::new("A", "B", 10, 2.0, 0.5);
        warm_up(&mut strategy, 10);
        strategy.on_tick(&tick("A", 230.0));
        strategy.reset();
        assert_eq!(strategy.state, SpreadState::Flat);
        assert!(!strategy.prices_a.is_full());
    }
}
