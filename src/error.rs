//! Error types for the trading backend

use thiserror::Error;

/// Errors raised by core components.
///
/// Handler failures are isolated by the event bus and logged; `Fatal`
/// additionally triggers process shutdown.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("risk breach: {0}")]
    Risk(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, TradingError>;
