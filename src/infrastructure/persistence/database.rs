use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite handle for the position ledger and the Helios ledger.
/// WAL journaling with FULL synchronous: a returned write is on disk.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full);

        // In-memory databases exist per connection; keep them on one
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                position_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                amount TEXT NOT NULL,
                strategy TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_price TEXT,
                closed_at TEXT,
                realized_pnl TEXT,
                close_reason TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_positions_status
            ON positions (status, opened_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position status index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_positions_symbol_status
            ON positions (symbol, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position symbol index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                deployment_id TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'PENDING',
                stable_version_id TEXT,
                created_at TEXT NOT NULL,
                deployed_at TEXT,
                rolled_back_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create deployments table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS phase_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deployment_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                recorded_at TEXT NOT NULL,
                FOREIGN KEY (deployment_id) REFERENCES deployments(deployment_id)
            );
            CREATE INDEX IF NOT EXISTS idx_phase_decisions_deployment
            ON phase_decisions (deployment_id, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create phase_decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS postmortems (
                postmortem_id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                severity INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                root_cause TEXT,
                corrective_actions TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'OPEN',
                created_at TEXT NOT NULL,
                closed_at TEXT,
                FOREIGN KEY (deployment_id) REFERENCES deployments(deployment_id)
            );
            CREATE INDEX IF NOT EXISTS idx_postmortems_severity_status
            ON postmortems (severity, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create postmortems table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rollback_history (
                rollback_id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                trigger_phase TEXT NOT NULL,
                trigger_reason TEXT NOT NULL,
                from_version TEXT NOT NULL,
                to_version TEXT,
                success INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (deployment_id) REFERENCES deployments(deployment_id)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create rollback_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stable_versions (
                version_id TEXT PRIMARY KEY,
                deployment_id TEXT,
                is_current INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create stable_versions table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes_in_memory() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        for table in [
            "positions",
            "deployments",
            "phase_decisions",
            "postmortems",
            "rollback_history",
            "stable_versions",
        ] {
            let count: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&db.pool)
            .await
            .unwrap();
            assert_eq!(count.0, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.init().await.unwrap();
        db.init().await.unwrap();
    }
}
