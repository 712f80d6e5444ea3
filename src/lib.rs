//! tickflow - event-driven paper trading backend
//!
//! Synthetic or exchange-sourced ticks flow through a typed event bus
//! into a trading pipeline: strategies emit signals, the order manager
//! converts them into orders and simulates fills, the risk manager
//! vetoes unsafe orders, and the position tracker maintains positions,
//! P&L, and cash. Every durable state change lands in SQLite and is
//! queryable over HTTP and a WebSocket push channel.
//!
//! ## Architecture
//!
//! - **Bus**: typed pub/sub with handler isolation and bounded history
//! - **Feed**: synthetic random walk or exchange WebSocket adapter
//! - **Strategies**: mean reversion and pairs trading on z-scores
//! - **Execution**: simulated fills with configurable slippage
//! - **Risk**: order value, position size, and drawdown limits
//! - **Persistence**: best-effort SQLite sink off the bus

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod orders;
pub mod persistence;
pub mod positions;
pub mod risk;
pub mod stops;
pub mod storage;
pub mod strategy;

pub use bus::EventBus;
pub use config::Config;
pub use error::{Result, TradingError};
pub use feed::{ExchangeFeed, MarketFeed, SyntheticFeed};
pub use orders::{ExecutionConfig, OrderManager};
pub use persistence::PersistenceService;
pub use positions::PositionTracker;
pub use risk::{RiskLimits, RiskManager};
pub use stops::StopLossManager;
pub use storage::Storage;
pub use strategy::{MeanReversionStrategy, PairsTradingStrategy, Strategy, StrategyEngine};
