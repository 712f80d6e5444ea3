//! Runtime configuration
//!
//! Environment-driven with sensible defaults for local simulation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // === Feed ===
    /// Use the synthetic random-walk feed instead of the exchange adapter
    pub use_synthetic_feed: bool,
    /// Symbols to stream and trade
    pub symbols: Vec<String>,
    /// Synthetic feed tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Exchange WebSocket base URL
    pub exchange_ws_url: String,

    // === Portfolio ===
    /// Starting cash balance
    pub initial_cash: Decimal,

    // === Risk limits ===
    /// Maximum notional value of a single order
    pub max_order_value: Decimal,
    /// Maximum absolute position size in shares
    pub max_position_size: i64,
    /// Maximum portfolio drawdown from peak equity (0.0 - 1.0)
    pub max_drawdown_pct: Decimal,

    // === Execution ===
    /// Shares per full-strength signal
    pub max_qty_per_signal: i64,
    /// Window the order manager waits for a risk decision, in milliseconds
    pub risk_wait_ms: u64,
    /// Simulated slippage in basis points (buy above, sell below)
    pub slippage_bps: i64,

    // === Strategy parameters ===
    /// Rolling price window for mean reversion
    pub window_size: usize,
    /// Z-score entry threshold
    pub entry_z: f64,
    /// Stop-loss distance from average entry (0.0 - 1.0)
    pub stop_loss_pct: Decimal,

    // === Persistence ===
    /// Path to the SQLite database
    pub db_path: String,
    /// Portfolio snapshot persistence interval in seconds
    pub snapshot_interval_secs: u64,

    // === API ===
    pub api_host: String,
    pub api_port: u16,

    // === Logging ===
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Feed
            use_synthetic_feed: true,
            symbols: vec!["AAPL".to_string(), "MSFT".to_string(), "GOOGL".to_string()],
            tick_interval_ms: 500,
            exchange_ws_url: "wss://stream.binance.com:9443/ws".to_string(),

            // Portfolio
            initial_cash: dec!(100000),

            // Risk
            max_order_value: dec!(5000),
            max_position_size: 10_000,
            max_drawdown_pct: dec!(0.05),

            // Execution
            max_qty_per_signal: 100,
            risk_wait_ms: 50,
            slippage_bps: 5,

            // Strategy
            window_size: 20,
            entry_z: 2.0,
            stop_loss_pct: dec!(0.02),

            // Persistence
            db_path: "data/tickflow.db".to_string(),
            snapshot_interval_secs: 60,

            // API
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,

            // Logging
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Feed
        if let Ok(v) = std::env::var("USE_SYNTHETIC_FEED") {
            if let Ok(b) = v.parse() {
                config.use_synthetic_feed = b;
            }
        }
        if let Ok(v) = std::env::var("SYMBOLS") {
            config.symbols = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("TICK_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                config.tick_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("EXCHANGE_WS_URL") {
            config.exchange_ws_url = v;
        }

        // Portfolio
        if let Ok(v) = std::env::var("INITIAL_CASH") {
            if let Ok(d) = v.parse() {
                config.initial_cash = d;
            }
        }

        // Risk
        if let Ok(v) = std::env::var("MAX_ORDER_VALUE") {
            if let Ok(d) = v.parse() {
                config.max_order_value = d;
            }
        }
        if let Ok(v) = std::env::var("MAX_POSITION_SIZE") {
            if let Ok(n) = v.parse() {
                config.max_position_size = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_DRAWDOWN_PCT") {
            if let Ok(d) = v.parse() {
                config.max_drawdown_pct = d;
            }
        }

        // Execution
        if let Ok(v) = std::env::var("MAX_QTY_PER_SIGNAL") {
            if let Ok(n) = v.parse() {
                config.max_qty_per_signal = n;
            }
        }
        if let Ok(v) = std::env::var("RISK_WAIT_MS") {
            if let Ok(n) = v.parse() {
                config.risk_wait_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SLIPPAGE_BPS") {
            if let Ok(n) = v.parse() {
                config.slippage_bps = n;
            }
        }

        // Strategy
        if let Ok(v) = std::env::var("WINDOW_SIZE") {
            if let Ok(n) = v.parse() {
                config.window_size = n;
            }
        }
        if let Ok(v) = std::env::var("ENTRY_Z") {
            if let Ok(f) = v.parse() {
                config.entry_z = f;
            }
        }
        if let Ok(v) = std::env::var("STOP_LOSS_PCT") {
            if let Ok(d) = v.parse() {
                config.stop_loss_pct = d;
            }
        }

        // Persistence
        if let Ok(v) = std::env::var("DB_PATH") {
            config.db_path = v;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                config.snapshot_interval_secs = n;
            }
        }

        // API
        if let Ok(v) = std::env::var("API_HOST") {
            config.api_host = v;
        }
        if let Ok(v) = std::env::var("API_PORT") {
            if let Ok(p) = v.parse() {
                config.api_port = p;
            }
        }

        // Logging
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }
}
