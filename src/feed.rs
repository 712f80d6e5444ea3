//! Market data feeds
//!
//! Two producers of TICK events: a synthetic random-walk generator for
//! local simulation, and a read-only exchange WebSocket adapter
//! (Binance bookTicker) that falls back to the synthetic feed when the
//! connection cannot be established. The core tolerates gaps; a feed
//! that publishes nothing is merely quiet.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::bus::EventBus;
use crate::models::{Event, Tick, PRICE_SCALE};

/// Cooperative stop flag shared with the running feed task.
#[derive(Clone)]
pub struct FeedStop(Arc<AtomicBool>);

impl FeedStop {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait MarketFeed: Send {
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Stream ticks until the stop handle fires.
    async fn run(self: Box<Self>) -> anyhow::Result<()>;

    fn stop_handle(&self) -> FeedStop;
}

/// Random-walk tick generator for the configured symbols.
pub struct SyntheticFeed {
    bus: Arc<EventBus>,
    symbols: Vec<String>,
    interval: Duration,
    prices: HashMap<String, f64>,
    volatility: f64,
    stop: FeedStop,
}

impl SyntheticFeed {
    pub fn new(bus: Arc<EventBus>, symbols: Vec<String>, interval: Duration) -> Self {
        let prices = symbols
            .iter()
            .map(|s| (s.clone(), rand::thread_rng().gen_range(100.0..500.0)))
            .collect();
        Self {
            bus,
            symbols,
            interval,
            prices,
            volatility: 0.001,
            stop: FeedStop::new(),
        }
    }

    fn make_tick(symbol: &str, price: f64) -> Option<Tick> {
        let last = Decimal::try_from(price).ok()?.round_dp(PRICE_SCALE);
        if last <= Decimal::ZERO {
            return None;
        }
        let spread = last * Decimal::new(5, 4);
        Some(Tick {
            symbol: symbol.to_string(),
            last,
            bid: (last - spread).round_dp(PRICE_SCALE),
            ask: (last + spread).round_dp(PRICE_SCALE),
            volume: rand::thread_rng().gen_range(100..10_000),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl MarketFeed for SyntheticFeed {
    async fn connect(&mut self) -> anyhow::Result<()> {
        info!(symbols = ?self.symbols, "synthetic feed connected");
        Ok(())
    }

    async fn run(mut self: Box<Self>) -> anyhow::Result<()> {
        info!("synthetic feed streaming");
        while self.stop.is_running() {
            for symbol in &self.symbols {
                let Some(price) = self.prices.get_mut(symbol) else {
                    continue;
                };
                // Rng must not live across an await.
                let step = rand::thread_rng().gen_range(-1.0..1.0) * self.volatility * *price;
                *price = (*price + step).max(0.01);

                if let Some(tick) = Self::make_tick(symbol, *price) {
                    crate::metrics::TICKS.with_label_values(&[symbol]).inc();
                    self.bus.publish(Event::tick(tick)).await;
                }
            }
            sleep(self.interval).await;
        }
        info!("synthetic feed stopped");
        Ok(())
    }

    fn stop_handle(&self) -> FeedStop {
        self.stop.clone()
    }
}

/// Binance bookTicker adapter. One socket per symbol, reconnecting
/// with exponential backoff. Falls back to the synthetic feed when the
/// initial connection fails.
pub struct ExchangeFeed {
    bus: Arc<EventBus>,
    symbols: Vec<String>,
    ws_base: String,
    stop: FeedStop,
    fallback: Option<Box<SyntheticFeed>>,
}

impl ExchangeFeed {
    pub fn new(
        bus: Arc<EventBus>,
        symbols: Vec<String>,
        ws_base: String,
        fallback_interval: Duration,
    ) -> Self {
        let fallback = Box::new(SyntheticFeed::new(
            Arc::clone(&bus),
            symbols.clone(),
            fallback_interval,
        ));
        Self {
            bus,
            symbols,
            ws_base,
            stop: FeedStop::new(),
            fallback: Some(fallback),
        }
    }

    fn stream_url(&self, symbol: &str) -> anyhow::Result<Url> {
        let topic = format!("{}@bookTicker", symbol.to_lowercase());
        let raw = format!("{}/{}", self.ws_base.trim_end_matches('/'), topic);
        Ok(Url::parse(&raw)?)
    }

    async fn stream_symbol(bus: Arc<EventBus>, symbol: String, url: Url, stop: FeedStop) {
        let mut attempt: u32 = 0;
        while stop.is_running() {
            match connect_async(url.as_str()).await {
                Ok((mut ws, _resp)) => {
                    info!(symbol = %symbol, "exchange stream connected");
                    attempt = 0;

                    while let Some(frame) = ws.next().await {
                        if !stop.is_running() {
                            return;
                        }
                        match frame {
                            Ok(msg) if msg.is_text() => {
                                let Ok(text) = msg.into_text() else { continue };
                                if let Some(tick) = parse_book_ticker(&symbol, &text) {
                                    crate::metrics::TICKS.with_label_values(&[&symbol]).inc();
                                    bus.publish(Event::tick(tick)).await;
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                error!(symbol = %symbol, error = %err, "stream read error");
                                break;
                            }
                        }
                    }
                    info!(symbol = %symbol, "exchange stream disconnected, reconnecting");
                }
                Err(err) => {
                    error!(symbol = %symbol, error = %err, "exchange connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            let backoff = 500u64.saturating_mul(1 << attempt.min(6));
            let jitter = rand::thread_rng().gen_range(0..=250);
            sleep(Duration::from_millis(backoff + jitter)).await;
        }
    }
}

/// Parse a bookTicker frame into a tick. The frame quotes best bid
/// and ask; last trades at the mid.
fn parse_book_ticker(symbol: &str, text: &str) -> Option<Tick> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let bid: Decimal = value.get("b")?.as_str()?.parse().ok()?;
    let ask: Decimal = value.get("a")?.as_str()?.parse().ok()?;
    if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
        return None;
    }
    let bid_size: f64 = value
        .get("B")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    Some(Tick {
        symbol: symbol.to_string(),
        last: ((bid + ask) / Decimal::TWO).round_dp(PRICE_SCALE),
        bid: bid.round_dp(PRICE_SCALE),
        ask: ask.round_dp(PRICE_SCALE),
        volume: bid_size as i64,
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl MarketFeed for ExchangeFeed {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let probe = self.stream_url(&self.symbols[0])?;
        match connect_async(probe.as_str()).await {
            Ok((ws, _resp)) => {
                drop(ws);
                self.fallback = None;
                info!(symbols = ?self.symbols, "exchange feed connected");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "exchange connect failed, falling back to synthetic feed");
                if let Some(fallback) = self.fallback.as_mut() {
                    fallback.connect().await?;
                }
                Ok(())
            }
        }
    }

    async fn run(mut self: Box<Self>) -> anyhow::Result<()> {
        if let Some(fallback) = self.fallback.take() {
            return fallback.run().await;
        }

        let mut tasks = Vec::new();
        for symbol in self.symbols.clone() {
            let url = self.stream_url(&symbol)?;
            let bus = Arc::clone(&self.bus);
            let stop = self.stop.clone();
            tasks.push(tokio::spawn(Self::stream_symbol(bus, symbol, url, stop)));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    fn stop_handle(&self) -> FeedStop {
        // The fallback owns the loop once engaged.
        match &self.fallback {
            Some(fallback) => fallback.stop_handle(),
            None => self.stop.clone(),
        }
    }
}
