use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the exchange adapter and its backends
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("rate limited: retry in {wait:?}")]
    RateLimited { wait: Duration },

    #[error("circuit open: retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode exchange response: {0}")]
    Decode(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid request: {0}")]
    Validation(String),
}

impl ExchangeError {
    /// Transient failures are environment problems; the circuit breaker
    /// records them. Decode and validation errors are bugs and record nothing.
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::Timeout(_) | ExchangeError::Unavailable(_)
        )
    }
}

/// Errors from the position ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("position not found: {0}")]
    NotFound(String),

    #[error("invalid transition for position {position_id}: {reason}")]
    Conflict { position_id: String, reason: String },

    #[error("corrupt position row {position_id}: {reason}")]
    Corrupt { position_id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Errors from the Helios deployment protocol
#[derive(Debug, Error)]
pub enum HeliosError {
    #[error("deployments blocked: {0}")]
    Blocked(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("postmortem not found: {0}")]
    PostmortemNotFound(String),

    #[error("postmortem completion requires a root cause and at least one corrective action")]
    IncompletePostmortem,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Violations of market snapshot invariants
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("non-positive last price for {symbol}")]
    NonPositivePrice { symbol: String },

    #[error("crossed book for {symbol}: bid {bid} > ask {ask}")]
    CrossedBook {
        symbol: String,
        bid: rust_decimal::Decimal,
        ask: rust_decimal::Decimal,
    },

    #[error("negative 24h volume for {symbol}")]
    NegativeVolume { symbol: String },

    #[error("candle timestamps out of order for {symbol} at index {index}")]
    UnorderedCandles { symbol: String, index: usize },
}
