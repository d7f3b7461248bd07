use crate::domain::errors::{ExchangeError, LedgerError};
use crate::domain::market::{Ohlcv, OrderBook, Ticker, Timeframe};
use crate::domain::order::{OrderAck, OrderRequest};
use crate::domain::position::{OpenPositionRequest, Position, ReconcileSummary};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Raw I/O seam to one exchange. Implementations perform the network (or
/// simulated) calls only; rate limiting, circuit breaking, timeouts and
/// retries live in the adapter that wraps this trait.
#[async_trait]
pub trait ExchangeBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    async fn fetch_order_book(&self, symbol: &str, depth: usize)
    -> Result<OrderBook, ExchangeError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, ExchangeError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Authoritative holdings snapshot (base asset -> amount) used by
    /// ledger reconciliation
    async fn fetch_holdings(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;
}

/// Durable position ledger. One handle per worker; every call is its own
/// transaction.
#[async_trait]
pub trait PositionLedger: Send + Sync {
    async fn open_position(&self, request: OpenPositionRequest) -> Result<Position, LedgerError>;

    async fn close_position(
        &self,
        position_id: &str,
        exit_price: Decimal,
        reason: &str,
        fees: Decimal,
    ) -> Result<Position, LedgerError>;

    async fn get_position(&self, position_id: &str) -> Result<Position, LedgerError>;

    async fn open_positions(&self) -> Result<Vec<Position>, LedgerError>;

    /// Paged variant for large ledgers
    async fn open_positions_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Position>, LedgerError>;

    async fn recent_closed(&self, limit: i64) -> Result<Vec<Position>, LedgerError>;

    /// Compares open positions against an authoritative holdings snapshot.
    /// Reports discrepancies; never mutates.
    async fn reconcile(
        &self,
        holdings: &HashMap<String, Decimal>,
    ) -> Result<ReconcileSummary, LedgerError>;

    /// Ensures all pending writes are committed before shutdown
    async fn flush(&self) -> Result<(), LedgerError>;
}

/// Restores a previously retained stable version during a rollback. The
/// deployment substrate decides what "restore" means (file-level, package
/// manager, container tag).
#[async_trait]
pub trait VersionRestorer: Send + Sync {
    async fn restore(&self, version_id: &str) -> anyhow::Result<()>;
}
