use crate::domain::errors::LedgerError;
use crate::domain::market::base_asset;
use crate::domain::position::{
    Discrepancy, DiscrepancyKind, OpenPositionRequest, Position, PositionSide, PositionStatus,
    ReconcileSummary, realized_pnl,
};
use crate::domain::ports::PositionLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Amount differences below this are treated as dust, not discrepancies
const RECONCILE_TOLERANCE: Decimal = dec!(0.00000001);

/// SQLite-backed position ledger. Every call is its own transaction; all
/// inputs are bound parameters.
pub struct SqlitePositionLedger {
    pool: SqlitePool,
}

impl SqlitePositionLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<Position, LedgerError> {
        let position_id: String = row.try_get("position_id")?;

        let corrupt = |reason: &str| LedgerError::Corrupt {
            position_id: position_id.clone(),
            reason: reason.to_string(),
        };

        let decimal = |value: &str, field: &str| {
            Decimal::from_str(value).map_err(|_| corrupt(&format!("bad {}: {}", field, value)))
        };
        let timestamp = |value: &str, field: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| corrupt(&format!("bad {}: {}", field, value)))
        };

        let side: String = row.try_get("side")?;
        let status: String = row.try_get("status")?;
        let entry_price: String = row.try_get("entry_price")?;
        let amount: String = row.try_get("amount")?;
        let opened_at: String = row.try_get("opened_at")?;
        let exit_price: Option<String> = row.try_get("exit_price")?;
        let closed_at: Option<String> = row.try_get("closed_at")?;
        let pnl: Option<String> = row.try_get("realized_pnl")?;
        let metadata: String = row.try_get("metadata")?;

        Ok(Position {
            symbol: row.try_get("symbol")?,
            side: PositionSide::from_str(&side).map_err(|_| corrupt("unknown side"))?,
            entry_price: decimal(&entry_price, "entry_price")?,
            amount: decimal(&amount, "amount")?,
            strategy: row.try_get("strategy")?,
            opened_at: timestamp(&opened_at, "opened_at")?,
            status: PositionStatus::from_str(&status).map_err(|_| corrupt("unknown status"))?,
            exit_price: exit_price
                .map(|v| decimal(&v, "exit_price"))
                .transpose()?,
            closed_at: closed_at.map(|v| timestamp(&v, "closed_at")).transpose()?,
            realized_pnl: pnl.map(|v| decimal(&v, "realized_pnl")).transpose()?,
            close_reason: row.try_get("close_reason")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            position_id,
        })
    }

    fn map_rows(rows: Vec<SqliteRow>) -> Result<Vec<Position>, LedgerError> {
        rows.iter().map(Self::map_row).collect()
    }
}

#[async_trait]
impl PositionLedger for SqlitePositionLedger {
    async fn open_position(&self, request: OpenPositionRequest) -> Result<Position, LedgerError> {
        let position = Position {
            position_id: Uuid::new_v4().to_string(),
            symbol: request.symbol,
            side: request.side,
            entry_price: request.entry_price,
            amount: request.amount,
            strategy: request.strategy,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
            metadata: request.metadata,
        };

        sqlx::query(
            r#"
            INSERT INTO positions
                (position_id, symbol, side, entry_price, amount, strategy, opened_at, status, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.position_id)
        .bind(&position.symbol)
        .bind(position.side.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.amount.to_string())
        .bind(&position.strategy)
        .bind(position.opened_at.to_rfc3339())
        .bind(position.status.to_string())
        .bind(position.metadata.to_string())
        .execute(&self.pool)
        .await?;

        info!(
            "Ledger: opened {} {} {} @ {} ({})",
            position.side, position.amount, position.symbol, position.entry_price,
            position.position_id
        );
        Ok(position)
    }

    async fn close_position(
        &self,
        position_id: &str,
        exit_price: Decimal,
        reason: &str,
        fees: Decimal,
    ) -> Result<Position, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM positions WHERE position_id = ?")
            .bind(position_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(position_id.to_string()))?;

        let position = Self::map_row(&row)?;
        if position.status != PositionStatus::Open {
            return Err(LedgerError::Conflict {
                position_id: position_id.to_string(),
                reason: "position already closed".to_string(),
            });
        }

        let pnl = realized_pnl(
            position.entry_price,
            exit_price,
            position.amount,
            position.side,
            fees,
        );
        let closed_at = Utc::now();

        // The status guard makes the OPEN -> CLOSED transition happen at
        // most once even under racing closers
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED', exit_price = ?, closed_at = ?, realized_pnl = ?, close_reason = ?
            WHERE position_id = ? AND status = 'OPEN'
            "#,
        )
        .bind(exit_price.to_string())
        .bind(closed_at.to_rfc3339())
        .bind(pnl.to_string())
        .bind(reason)
        .bind(position_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Conflict {
                position_id: position_id.to_string(),
                reason: "concurrent close won the transition".to_string(),
            });
        }

        tx.commit().await?;

        info!(
            "Ledger: closed {} @ {} (pnl {}, reason: {})",
            position_id, exit_price, pnl, reason
        );

        Ok(Position {
            status: PositionStatus::Closed,
            exit_price: Some(exit_price),
            closed_at: Some(closed_at),
            realized_pnl: Some(pnl),
            close_reason: Some(reason.to_string()),
            ..position
        })
    }

    async fn get_position(&self, position_id: &str) -> Result<Position, LedgerError> {
        let row = sqlx::query("SELECT * FROM positions WHERE position_id = ?")
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::NotFound(position_id.to_string()))?;
        Self::map_row(&row)
    }

    async fn open_positions(&self) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'OPEN' ORDER BY opened_at")
            .fetch_all(&self.pool)
            .await?;
        Self::map_rows(rows)
    }

    async fn open_positions_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE status = 'OPEN' ORDER BY opened_at LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::map_rows(rows)
    }

    async fn recent_closed(&self, limit: i64) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE status = 'CLOSED' ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Self::map_rows(rows)
    }

    async fn reconcile(
        &self,
        holdings: &HashMap<String, Decimal>,
    ) -> Result<ReconcileSummary, LedgerError> {
        let open = self.open_positions().await?;

        // Net signed exposure per base asset according to the ledger
        let mut expected: HashMap<String, Decimal> = HashMap::new();
        for position in &open {
            let asset = base_asset(&position.symbol).to_string();
            *expected.entry(asset).or_insert(Decimal::ZERO) += position.signed_amount();
        }

        let mut discrepancies = Vec::new();

        for (asset, ledger_amount) in &expected {
            let exchange_amount = holdings.get(asset).copied().unwrap_or(Decimal::ZERO);
            let diff = (*ledger_amount - exchange_amount).abs();
            if diff <= RECONCILE_TOLERANCE {
                continue;
            }
            let kind = if exchange_amount == Decimal::ZERO {
                DiscrepancyKind::MissingOnExchange
            } else {
                DiscrepancyKind::AmountMismatch
            };
            discrepancies.push(Discrepancy {
                symbol: asset.clone(),
                kind,
                ledger_amount: *ledger_amount,
                exchange_amount,
            });
        }

        for (asset, exchange_amount) in holdings {
            if expected.contains_key(asset) || exchange_amount.abs() <= RECONCILE_TOLERANCE {
                continue;
            }
            discrepancies.push(Discrepancy {
                symbol: asset.clone(),
                kind: DiscrepancyKind::UntrackedHolding,
                ledger_amount: Decimal::ZERO,
                exchange_amount: *exchange_amount,
            });
        }

        if !discrepancies.is_empty() {
            warn!(
                "Ledger reconciliation found {} discrepancies across {} open positions",
                discrepancies.len(),
                open.len()
            );
        }

        Ok(ReconcileSummary {
            open_positions_checked: open.len(),
            discrepancies,
        })
    }

    async fn flush(&self) -> Result<(), LedgerError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    async fn ledger() -> SqlitePositionLedger {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqlitePositionLedger::new(db.pool)
    }

    fn open_request(symbol: &str, amount: Decimal) -> OpenPositionRequest {
        OpenPositionRequest {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: dec!(50000),
            amount,
            strategy: "momentum_rider".to_string(),
            metadata: serde_json::json!({"initial_stop": "48850"}),
        }
    }

    #[tokio::test]
    async fn test_open_then_get_roundtrip() {
        let ledger = ledger().await;
        let opened = ledger
            .open_position(open_request("BTC/USDT", dec!(0.5)))
            .await
            .unwrap();

        let fetched = ledger.get_position(&opened.position_id).await.unwrap();
        assert_eq!(fetched.symbol, "BTC/USDT");
        assert_eq!(fetched.side, PositionSide::Long);
        assert_eq!(fetched.entry_price, dec!(50000));
        assert_eq!(fetched.amount, dec!(0.5));
        assert_eq!(fetched.status, PositionStatus::Open);
        assert_eq!(fetched.metadata["initial_stop"], "48850");
        assert!(fetched.realized_pnl.is_none());
    }

    #[tokio::test]
    async fn test_close_computes_pnl_and_is_single_shot() {
        let ledger = ledger().await;
        let opened = ledger
            .open_position(open_request("BTC/USDT", dec!(2)))
            .await
            .unwrap();

        let closed = ledger
            .close_position(&opened.position_id, dec!(51000), "take profit", dec!(10))
            .await
            .unwrap();

        // (51000 - 50000) * 2 - 10
        assert_eq!(closed.realized_pnl, Some(dec!(1990)));
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some("take profit"));

        // Second close must conflict, and the stored row must be unchanged
        let err = ledger
            .close_position(&opened.position_id, dec!(40000), "again", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        let stored = ledger.get_position(&opened.position_id).await.unwrap();
        assert_eq!(stored.exit_price, Some(dec!(51000)));
    }

    #[tokio::test]
    async fn test_close_unknown_position_not_found() {
        let ledger = ledger().await;
        let err = ledger
            .close_position("nope", dec!(1), "x", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_listing_and_pagination() {
        let ledger = ledger().await;
        for i in 0..5 {
            ledger
                .open_position(open_request("BTC/USDT", Decimal::from(i + 1)))
                .await
                .unwrap();
        }

        let all = ledger.open_positions().await.unwrap();
        assert_eq!(all.len(), 5);

        let page = ledger.open_positions_page(2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, dec!(3));
    }

    #[tokio::test]
    async fn test_recent_closed_ordering() {
        let ledger = ledger().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let p = ledger
                .open_position(open_request("ETH/USDT", dec!(1)))
                .await
                .unwrap();
            ids.push(p.position_id);
        }
        for id in &ids {
            ledger
                .close_position(id, dec!(50100), "cycle", Decimal::ZERO)
                .await
                .unwrap();
        }

        let recent = ledger.recent_closed(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|p| p.status == PositionStatus::Closed));
    }

    #[tokio::test]
    async fn test_reconcile_clean_state() {
        let ledger = ledger().await;
        ledger
            .open_position(open_request("BTC/USDT", dec!(0.5)))
            .await
            .unwrap();

        let mut holdings = HashMap::new();
        holdings.insert("BTC".to_string(), dec!(0.5));

        let summary = ledger.reconcile(&holdings).await.unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.open_positions_checked, 1);
    }

    #[tokio::test]
    async fn test_reconcile_reports_without_mutating() {
        let ledger = ledger().await;
        let opened = ledger
            .open_position(open_request("BTC/USDT", dec!(1)))
            .await
            .unwrap();

        let mut holdings = HashMap::new();
        holdings.insert("BTC".to_string(), dec!(0.4));
        holdings.insert("DOGE".to_string(), dec!(5000));

        let summary = ledger.reconcile(&holdings).await.unwrap();
        assert_eq!(summary.discrepancies.len(), 2);

        let mismatch = summary
            .discrepancies
            .iter()
            .find(|d| d.symbol == "BTC")
            .unwrap();
        assert_eq!(mismatch.kind, DiscrepancyKind::AmountMismatch);
        assert_eq!(mismatch.ledger_amount, dec!(1));
        assert_eq!(mismatch.exchange_amount, dec!(0.4));

        let untracked = summary
            .discrepancies
            .iter()
            .find(|d| d.symbol == "DOGE")
            .unwrap();
        assert_eq!(untracked.kind, DiscrepancyKind::UntrackedHolding);

        // Never silently mutates
        let still_open = ledger.get_position(&opened.position_id).await.unwrap();
        assert_eq!(still_open.status, PositionStatus::Open);
        assert_eq!(still_open.amount, dec!(1));
    }

    #[tokio::test]
    async fn test_reconcile_missing_on_exchange() {
        let ledger = ledger().await;
        ledger
            .open_position(open_request("SOL/USDT", dec!(10)))
            .await
            .unwrap();

        let summary = ledger.reconcile(&HashMap::new()).await.unwrap();
        assert_eq!(summary.discrepancies.len(), 1);
        assert_eq!(
            summary.discrepancies[0].kind,
            DiscrepancyKind::MissingOnExchange
        );
    }

    #[tokio::test]
    async fn test_hostile_strings_are_bound_inertly() {
        let ledger = ledger().await;
        let hostile = "'; DROP TABLE positions; --";

        let opened = ledger
            .open_position(OpenPositionRequest {
                symbol: "BTC/USDT".to_string(),
                side: PositionSide::Long,
                entry_price: dec!(100),
                amount: dec!(1),
                strategy: hostile.to_string(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();

        ledger
            .close_position(&opened.position_id, dec!(101), hostile, Decimal::ZERO)
            .await
            .unwrap();

        // Table survived and the literal string round-trips
        let fetched = ledger.get_position(&opened.position_id).await.unwrap();
        assert_eq!(fetched.strategy, hostile);
        assert_eq!(fetched.close_reason.as_deref(), Some(hostile));
        assert_eq!(ledger.open_positions().await.unwrap().len(), 0);
    }
}
