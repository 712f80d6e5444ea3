//! Mean reversion on a rolling z-score
//!
//! Keeps a fixed window of recent prices per symbol and trades against
//! moves beyond `entry_z` standard deviations from the window mean.

use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

use super::{mean, sample_stdev, Strategy, Window};
use crate::models::{Side, Signal, Tick};

const MIN_STDEV: f64 = 1e-9;

pub struct MeanReversionStrategy {
    id: String,
    symbols: Vec<String>,
    window_size: usize,
    entry_z: f64,
    windows: HashMap<String, Window>,
}

impl MeanReversionStrategy {
    pub fn new(symbols: Vec<String>, window_size: usize, entry_z: f64) -> Self {
        Self {
            id: "mean_reversion".to_string(),
            symbols,
            window_size,
            entry_z,
            windows: HashMap::new(),
        }
    }
}

impl Strategy for MeanReversionStrategy {
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

        let window = self
            .windows
            .entry(tick.symbol.clone())
            .or_insert_with(|| Window::new(self.window_size));
        window.push(price);

        if !window.is_full() {
            return Vec::new();
        }

        let values: Vec<f64> = window.iter().collect();
        let mu = mean(values.iter().copied());
        let sigma = sample_stdev(&values);
        if sigma < MIN_STDEV {
            return Vec::new();
        }

        let z = (price - mu) / sigma;
        let strength = (z.abs() / (2.0 * self.entry_z)).min(1.0);

        if z > self.entry_z {
            vec![Signal::new(self.id.clone(), tick.symbol.clone(), Side::Sell, strength)]
        } else if z < -self.entry_z {
            vec![Signal::new(self.id.clone(), tick.symbol.clone(), Side::Buy, strength)]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            last: price,
            bid: price,
            ask: price,
            volume: 100,
            timestamp: Utc::now(),
        }
    }

    fn feed(strategy: &mut MeanReversionStrategy, symbol: &str, prices: &[Decimal]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for price in prices {
            signals.extend(strategy.on_tick(&tick(symbol, *price)));
        }
        signals
    }

    #[test]
    fn no_signal_until_window_is_full() {
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 20, 2.0);
        let prices: Vec<Decimal> = (0..19).map(|i| Decimal::from(100 + (i % 3))).collect();
        assert!(feed(&mut strategy, "ACME", &prices).is_empty());
    }

    #[test]
    fn drop_below_entry_z_buys_at_full_strength() {
        // Nineteen ticks at 100 and one at 90 put z around -4.2; the
        // strength saturates at 1.0.
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 20, 2.0);
        let mut prices = vec![dec!(100); 19];
        prices.push(dec!(90));

        let signals = feed(&mut strategy, "ACME", &prices);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);
        assert!((signals[0].strength - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn spike_above_entry_z_sells() {
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 20, 2.0);
        let mut prices = vec![dec!(100); 19];
        prices.push(dec!(110));

        let signals = feed(&mut strategy, "ACME", &prices);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
    }

    #[test]
    fn constant_prices_stay_quiet() {
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 20, 2.0);
        let prices = vec![dec!(100); 40];
        assert!(feed(&mut strategy, "ACME", &prices).is_empty());
    }

    #[test]
    fn exactly_entry_z_is_no_signal() {
        // Set entry_z to the exact z the window will produce; the
        // strict inequality must keep the strategy quiet.
        let values = [100.0, 100.0, 98.0, 102.0];
        let z = (102.0 - mean(values.iter().copied())) / sample_stdev(&values);
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 4, z);

        let signals = feed(
            &mut strategy,
            "ACME",
            &[dec!(100), dec!(100), dec!(98), dec!(102)],
        );
        assert!(signals.is_empty());
    }

    #[test]
    fn windows_are_per_symbol() {
        let mut strategy = MeanReversionStrategy::new(
            vec!["A".to_string(), "B".to_string()],
            20,
            2.0,
        );
        let mut prices = vec![dec!(100); 19];
        prices.push(dec!(90));

        // Interleave a second symbol; its partial window must not
        // contaminate the first.
        for price in &prices[..10] {
            strategy.on_tick(&tick("B", *price));
        }
        let signals = feed(&mut strategy, "A", &prices);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "A");
    }

    #[test]
    fn reset_replays_identically() {
        let mut strategy = MeanReversionStrategy::new(vec!["ACME".to_string()], 20, 2.0);
        let mut prices = vec![dec!(100); 19];
        prices.push(dec!(90));

        let first = feed(&mut strategy, "ACME", &prices);
        strategy.reset();
        let second = feed(&mut strategy, "ACME", &prices);

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].side, second[0].side);
        assert!((first[0].strength - second[0].strength).abs() < f64::EPSILON);
    }
}
