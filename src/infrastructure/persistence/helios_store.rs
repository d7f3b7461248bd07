use crate::domain::errors::HeliosError;
use crate::domain::helios::{
    DeploymentRecord, DeploymentStatus, HeliosPhase, PhaseDecision, PhaseOutcome, Postmortem,
    PostmortemSeverity, PostmortemStatus, RollbackRecord, StableVersion,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite store for the deployment ledger: deployments, phase decisions,
/// postmortems, rollback history and retained stable versions.
pub struct SqliteHeliosStore {
    pool: SqlitePool,
    stable_version_retention: i64,
}

impl SqliteHeliosStore {
    pub fn new(pool: SqlitePool, stable_version_retention: i64) -> Self {
        Self {
            pool,
            stable_version_retention: stable_version_retention.max(1),
        }
    }

    fn map_deployment(row: &SqliteRow) -> Result<DeploymentRecord, HeliosError> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let deployed_at: Option<String> = row.try_get("deployed_at")?;
        let rolled_back_at: Option<String> = row.try_get("rolled_back_at")?;

        Ok(DeploymentRecord {
            deployment_id: row.try_get("deployment_id")?,
            version: row.try_get("version")?,
            description: row.try_get("description")?,
            status: DeploymentStatus::from_str(&status)
                .unwrap_or(DeploymentStatus::Pending),
            stable_version_id: row.try_get("stable_version_id")?,
            created_at: parse_timestamp(&created_at),
            deployed_at: deployed_at.map(|t| parse_timestamp(&t)),
            rolled_back_at: rolled_back_at.map(|t| parse_timestamp(&t)),
        })
    }

    fn map_postmortem(row: &SqliteRow) -> Result<Postmortem, HeliosError> {
        let severity: i64 = row.try_get("severity")?;
        let status: String = row.try_get("status")?;
        let actions: String = row.try_get("corrective_actions")?;
        let created_at: String = row.try_get("created_at")?;
        let closed_at: Option<String> = row.try_get("closed_at")?;

        Ok(Postmortem {
            postmortem_id: row.try_get("postmortem_id")?,
            deployment_id: row.try_get("deployment_id")?,
            severity: PostmortemSeverity::from_rank(severity)
                .unwrap_or(PostmortemSeverity::S4),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            root_cause: row.try_get("root_cause")?,
            corrective_actions: serde_json::from_str(&actions).unwrap_or_default(),
            status: if status == "CLOSED" {
                PostmortemStatus::Closed
            } else {
                PostmortemStatus::Open
            },
            created_at: parse_timestamp(&created_at),
            closed_at: closed_at.map(|t| parse_timestamp(&t)),
        })
    }

    pub async fn insert_deployment(
        &self,
        deployment_id: &str,
        version: &str,
        description: &str,
        stable_version_id: Option<&str>,
    ) -> Result<DeploymentRecord, HeliosError> {
        sqlx::query(
            r#"
            INSERT INTO deployments
                (deployment_id, version, description, status, stable_version_id, created_at)
            VALUES (?, ?, ?, 'PENDING', ?, ?)
            "#,
        )
        .bind(deployment_id)
        .bind(version)
        .bind(description)
        .bind(stable_version_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_deployment(deployment_id).await
    }

    pub async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentRecord, HeliosError> {
        let row = sqlx::query("SELECT * FROM deployments WHERE deployment_id = ?")
            .bind(deployment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HeliosError::DeploymentNotFound(deployment_id.to_string()))?;
        Self::map_deployment(&row)
    }

    pub async fn set_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
    ) -> Result<(), HeliosError> {
        let stamp = Utc::now().to_rfc3339();
        let query = match status {
            DeploymentStatus::Deployed => {
                "UPDATE deployments SET status = ?, deployed_at = ? WHERE deployment_id = ?"
            }
            DeploymentStatus::RolledBack => {
                "UPDATE deployments SET status = ?, rolled_back_at = ? WHERE deployment_id = ?"
            }
            _ => "UPDATE deployments SET status = ? WHERE deployment_id = ?",
        };

        let result = match status {
            DeploymentStatus::Deployed | DeploymentStatus::RolledBack => sqlx::query(query)
                .bind(status.as_str())
                .bind(&stamp)
                .bind(deployment_id)
                .execute(&self.pool)
                .await?,
            _ => sqlx::query(query)
                .bind(status.as_str())
                .bind(deployment_id)
                .execute(&self.pool)
                .await?,
        };

        if result.rows_affected() == 0 {
            return Err(HeliosError::DeploymentNotFound(deployment_id.to_string()));
        }
        Ok(())
    }

    pub async fn insert_phase_decision(
        &self,
        deployment_id: &str,
        phase: HeliosPhase,
        outcome: PhaseOutcome,
        reason: &str,
    ) -> Result<(), HeliosError> {
        sqlx::query(
            r#"
            INSERT INTO phase_decisions (deployment_id, phase, outcome, reason, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(deployment_id)
        .bind(phase.as_str())
        .bind(outcome.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn phase_decisions(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<PhaseDecision>, HeliosError> {
        let rows = sqlx::query(
            "SELECT * FROM phase_decisions WHERE deployment_id = ? ORDER BY id",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;

        let mut decisions = Vec::with_capacity(rows.len());
        for row in rows {
            let phase: String = row.try_get("phase")?;
            let outcome: String = row.try_get("outcome")?;
            let recorded_at: String = row.try_get("recorded_at")?;
            decisions.push(PhaseDecision {
                deployment_id: row.try_get("deployment_id")?,
                phase: HeliosPhase::from_str(&phase)
                    .unwrap_or(HeliosPhase::Monitoring),
                outcome: PhaseOutcome::from_str(&outcome).unwrap_or(PhaseOutcome::Pending),
                reason: row.try_get("reason")?,
                recorded_at: parse_timestamp(&recorded_at),
            });
        }
        Ok(decisions)
    }

    /// True when every phase has a decision and the latest per phase is GO
    pub async fn all_phases_go(&self, deployment_id: &str) -> Result<bool, HeliosError> {
        let decisions = self.phase_decisions(deployment_id).await?;
        let mut latest: HashMap<HeliosPhase, PhaseOutcome> = HashMap::new();
        for decision in decisions {
            latest.insert(decision.phase, decision.outcome);
        }
        Ok(HeliosPhase::ALL
            .iter()
            .all(|phase| latest.get(phase) == Some(&PhaseOutcome::Go)))
    }

    pub async fn insert_postmortem(
        &self,
        postmortem_id: &str,
        deployment_id: &str,
        severity: PostmortemSeverity,
        title: &str,
        description: &str,
    ) -> Result<Postmortem, HeliosError> {
        sqlx::query(
            r#"
            INSERT INTO postmortems
                (postmortem_id, deployment_id, severity, title, description, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'OPEN', ?)
            "#,
        )
        .bind(postmortem_id)
        .bind(deployment_id)
        .bind(severity.rank())
        .bind(title)
        .bind(description)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_postmortem(postmortem_id).await
    }

    pub async fn get_postmortem(&self, postmortem_id: &str) -> Result<Postmortem, HeliosError> {
        let row = sqlx::query("SELECT * FROM postmortems WHERE postmortem_id = ?")
            .bind(postmortem_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HeliosError::PostmortemNotFound(postmortem_id.to_string()))?;
        Self::map_postmortem(&row)
    }

    pub async fn close_postmortem(
        &self,
        postmortem_id: &str,
        root_cause: &str,
        corrective_actions: &[String],
    ) -> Result<Postmortem, HeliosError> {
        let actions = serde_json::to_string(corrective_actions)
            .unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            UPDATE postmortems
            SET root_cause = ?, corrective_actions = ?, status = 'CLOSED', closed_at = ?
            WHERE postmortem_id = ? AND status = 'OPEN'
            "#,
        )
        .bind(root_cause)
        .bind(&actions)
        .bind(Utc::now().to_rfc3339())
        .bind(postmortem_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HeliosError::PostmortemNotFound(postmortem_id.to_string()));
        }

        self.get_postmortem(postmortem_id).await
    }

    pub async fn open_postmortems_by_severity(
        &self,
        severity: PostmortemSeverity,
    ) -> Result<Vec<Postmortem>, HeliosError> {
        let rows = sqlx::query(
            "SELECT * FROM postmortems WHERE severity = ? AND status = 'OPEN' ORDER BY created_at",
        )
        .bind(severity.rank())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_postmortem).collect()
    }

    pub async fn open_postmortem_counts(&self) -> Result<HashMap<i64, i64>, HeliosError> {
        let rows = sqlx::query(
            "SELECT severity, COUNT(*) AS n FROM postmortems WHERE status = 'OPEN' GROUP BY severity",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            counts.insert(row.try_get::<i64, _>("severity")?, row.try_get::<i64, _>("n")?);
        }
        Ok(counts)
    }

    pub async fn insert_rollback(&self, record: &RollbackRecord) -> Result<(), HeliosError> {
        sqlx::query(
            r#"
            INSERT INTO rollback_history
                (rollback_id, deployment_id, trigger_phase, trigger_reason,
                 from_version, to_version, success, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.rollback_id)
        .bind(&record.deployment_id)
        .bind(record.trigger_phase.as_str())
        .bind(&record.trigger_reason)
        .bind(&record.from_version)
        .bind(&record.to_version)
        .bind(record.success as i64)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rollback_count(&self) -> Result<i64, HeliosError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM rollback_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn current_stable_version(&self) -> Result<Option<StableVersion>, HeliosError> {
        let row = sqlx::query(
            "SELECT * FROM stable_versions WHERE is_current = 1 ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(StableVersion {
                    version_id: row.try_get("version_id")?,
                    deployment_id: row.try_get("deployment_id")?,
                    is_current: true,
                    created_at: parse_timestamp(&created_at),
                }))
            }
        }
    }

    /// Marks a version as the current stable one and prunes the retained
    /// history down to the configured retention.
    pub async fn mark_version_stable(
        &self,
        version_id: &str,
        deployment_id: Option<&str>,
    ) -> Result<(), HeliosError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE stable_versions SET is_current = 0")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO stable_versions (version_id, deployment_id, is_current, created_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(version_id) DO UPDATE SET is_current = 1, deployment_id = excluded.deployment_id
            "#,
        )
        .bind(version_id)
        .bind(deployment_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM stable_versions
            WHERE version_id NOT IN (
                SELECT version_id FROM stable_versions ORDER BY created_at DESC LIMIT ?
            )
            "#,
        )
        .bind(self.stable_version_retention)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Helios: version {} marked stable", version_id);
        Ok(())
    }

    /// Deployments holding a NO_GO decision that have not yet reached
    /// ROLLED_BACK; the monitor uses this as a recovery sweep.
    pub async fn pending_no_go_deployments(&self) -> Result<Vec<(String, String, String)>, HeliosError> {
        let rows = sqlx::query(
            r#"
            SELECT pd.deployment_id AS deployment_id,
                   MAX(pd.phase) AS phase,
                   MAX(pd.reason) AS reason
            FROM phase_decisions pd
            JOIN deployments d ON d.deployment_id = pd.deployment_id
            WHERE pd.outcome = 'NO_GO' AND d.status != 'ROLLED_BACK'
            GROUP BY pd.deployment_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            pending.push((
                row.try_get("deployment_id")?,
                row.try_get("phase")?,
                row.try_get("reason")?,
            ));
        }
        Ok(pending)
    }

    pub async fn deployment_counts(&self) -> Result<(i64, i64), HeliosError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM deployments")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        let rolled_back: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM deployments WHERE status = 'ROLLED_BACK'")
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;
        Ok((total, rolled_back))
    }
}
