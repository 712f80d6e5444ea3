//! Prometheus metrics
//!
//! All metrics live in a crate-local registry and are exposed through
//! the API's `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total", "market data ticks per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static SIGNALS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signals_total", "strategy signals by strategy and side"),
        &["strategy", "side"],
    )
    .unwrap()
});

pub static ORDERS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("orders_total", "orders submitted into the pipeline").unwrap());

pub static FILLS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("fills_total", "simulated fills").unwrap());

pub static RISK_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("risk_rejections_total", "orders rejected by risk rule"),
        &["rule"],
    )
    .unwrap()
});

pub static EQUITY: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("portfolio_equity", "cash plus open market value").unwrap());

pub static PNL_REALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_realized", "total realized PnL").unwrap());

pub static PNL_UNREALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_unrealized", "total unrealized PnL").unwrap());

pub fn init() {
    for result in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(SIGNALS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(RISK_REJECTIONS.clone())),
        REGISTRY.register(Box::new(EQUITY.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
        REGISTRY.register(Box::new(PNL_UNREALIZED.clone())),
    ] {
        // Double registration only happens when init() is called twice.
        let _ = result;
    }
}

/// Encode the registry in Prometheus text format.
pub fn encode_text() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
