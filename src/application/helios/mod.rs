//! Helios rollback protocol: a deployment state machine in which any
//! NO-GO phase decision triggers an automatic rollback to the retained
//! stable version and opens a severity-1 postmortem that blocks all
//! further deployments until it is closed with a root cause.

pub mod restore;

pub use restore::SnapshotDirRestorer;

use crate::domain::errors::HeliosError;
use crate::domain::events::EngineEvent;
use crate::domain::helios::{
    DeploymentRecord, DeploymentStatus, HeliosPhase, PhaseOutcome, Postmortem,
    PostmortemSeverity, RollbackRecord,
};
use crate::domain::ports::VersionRestorer;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::SqliteHeliosStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct HeliosStatus {
    pub total_deployments: i64,
    pub rolled_back_deployments: i64,
    pub open_postmortems: HashMap<String, i64>,
    pub rollbacks_recorded: i64,
    pub current_stable_version: Option<String>,
    pub can_deploy: bool,
    pub deploy_status_message: String,
}

pub struct HeliosProtocol {
    store: Arc<SqliteHeliosStore>,
    restorer: Arc<dyn VersionRestorer>,
    events: EventBus,
    monitoring_interval: Duration,
    // Separate locks, never held simultaneously
    rollback_lock: Mutex<()>,
    postmortem_lock: Mutex<()>,
}

impl HeliosProtocol {
    pub fn new(
        store: Arc<SqliteHeliosStore>,
        restorer: Arc<dyn VersionRestorer>,
        events: EventBus,
        monitoring_interval: Duration,
    ) -> Self {
        Self {
            store,
            restorer,
            events,
            monitoring_interval,
            rollback_lock: Mutex::new(()),
            postmortem_lock: Mutex::new(()),
        }
    }

    /// Registers a new deployment. Refused while any S1 postmortem is open.
    pub async fn register_deployment(
        &self,
        deployment_id: &str,
        version: &str,
        description: &str,
    ) -> Result<DeploymentRecord, HeliosError> {
        let (allowed, reason) = self.can_deploy().await?;
        if !allowed {
            return Err(HeliosError::Blocked(reason));
        }

        let stable = self.store.current_stable_version().await?;
        let record = self
            .store
            .insert_deployment(
                deployment_id,
                version,
                description,
                stable.as_ref().map(|v| v.version_id.as_str()),
            )
            .await?;

        info!(
            "Helios: deployment {} ({}) registered, stable fallback {:?}",
            deployment_id,
            version,
            record.stable_version_id
        );
        Ok(record)
    }

    /// Records one phase decision. A NO_GO hands off to the rollback
    /// worker and returns immediately; the main loop never blocks on the
    /// restore itself.
    pub async fn record_phase_decision(
        self: &Arc<Self>,
        deployment_id: &str,
        phase: HeliosPhase,
        outcome: PhaseOutcome,
        reason: &str,
    ) -> Result<(), HeliosError> {
        let deployment = self.store.get_deployment(deployment_id).await?;

        self.store
            .insert_phase_decision(deployment_id, phase, outcome, reason)
            .await?;
        info!(
            "Helios: {} recorded {} at {} ({})",
            deployment_id, outcome, phase, reason
        );

        if deployment.status == DeploymentStatus::Pending {
            self.store
                .set_deployment_status(deployment_id, DeploymentStatus::InProgress)
                .await?;
        }

        match outcome {
            PhaseOutcome::NoGo => {
                warn!(
                    "Helios: NO-GO in {} for {} - initiating automatic rollback",
                    phase, deployment_id
                );
                let protocol = Arc::clone(self);
                let deployment_id = deployment_id.to_string();
                let reason = reason.to_string();
                tokio::spawn(async move {
                    protocol
                        .execute_rollback(&deployment_id, phase, &reason)
                        .await;
                });
            }
            PhaseOutcome::Go => {
                if self.store.all_phases_go(deployment_id).await? {
                    self.store
                        .set_deployment_status(deployment_id, DeploymentStatus::Deployed)
                        .await?;
                    info!("Helios: {} fully deployed (all phases GO)", deployment_id);
                }
            }
            PhaseOutcome::Pending => {}
        }

        Ok(())
    }

    /// Rollback worker body. Holds `rollback_lock` for the restore and
    /// ledger updates, then releases it before postmortem creation.
    async fn execute_rollback(self: &Arc<Self>, deployment_id: &str, phase: HeliosPhase, reason: &str) {
        {
            let _guard = self.rollback_lock.lock().await;

            let deployment = match self.store.get_deployment(deployment_id).await {
                Ok(d) => d,
                Err(e) => {
                    error!("Helios: rollback lookup failed for {}: {}", deployment_id, e);
                    return;
                }
            };
            if deployment.status == DeploymentStatus::RolledBack {
                return;
            }

            let stable = match self.store.current_stable_version().await {
                Ok(v) => v,
                Err(e) => {
                    error!("Helios: stable version lookup failed: {}", e);
                    None
                }
            };

            let success = match &stable {
                Some(version) => match self.restorer.restore(&version.version_id).await {
                    Ok(()) => {
                        info!(
                            "Helios: restored stable version {} for {}",
                            version.version_id, deployment_id
                        );
                        true
                    }
                    Err(e) => {
                        error!(
                            "Helios: restore of {} failed: {}",
                            version.version_id, e
                        );
                        false
                    }
                },
                None => {
                    error!("Helios: no stable version retained; nothing to restore");
                    false
                }
            };

            let record = RollbackRecord {
                rollback_id: format!("rb-{}", Uuid::new_v4().simple()),
                deployment_id: deployment_id.to_string(),
                trigger_phase: phase,
                trigger_reason: reason.to_string(),
                from_version: deployment.version.clone(),
                to_version: stable.map(|v| v.version_id),
                success,
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert_rollback(&record).await {
                error!("Helios: failed to record rollback: {}", e);
            }

            if let Err(e) = self
                .store
                .set_deployment_status(deployment_id, DeploymentStatus::RolledBack)
                .await
            {
                error!("Helios: failed to mark {} rolled back: {}", deployment_id, e);
                return;
            }

            self.events.publish(EngineEvent::RollbackTriggered {
                deployment_id: deployment_id.to_string(),
                phase: phase.to_string(),
                reason: reason.to_string(),
            });
        }

        // Mandatory severity-1 postmortem, under its own lock
        if let Err(e) = self.open_postmortem(deployment_id, phase, reason).await {
            error!("Helios: failed to open postmortem for {}: {}", deployment_id, e);
        }
    }

    async fn open_postmortem(
        &self,
        deployment_id: &str,
        phase: HeliosPhase,
        reason: &str,
    ) -> Result<Postmortem, HeliosError> {
        let _guard = self.postmortem_lock.lock().await;

        let postmortem_id = format!(
            "PM-{}-{}",
            deployment_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let postmortem = self
            .store
            .insert_postmortem(
                &postmortem_id,
                deployment_id,
                PostmortemSeverity::S1,
                &format!("Automatic rollback - {} NO-GO decision", phase),
                &format!(
                    "Deployment {} was automatically rolled back after a NO-GO decision in the {} phase. Reason: {}",
                    deployment_id, phase, reason
                ),
            )
            .await?;

        warn!(
            "Helios: SEVERITY-1 postmortem {} opened; deployments are blocked until it is closed",
            postmortem_id
        );

        self.events.publish(EngineEvent::PostmortemOpened {
            postmortem_id: postmortem.postmortem_id.clone(),
            deployment_id: deployment_id.to_string(),
            severity: postmortem.severity.to_string(),
        });

        Ok(postmortem)
    }

    /// Deployments are allowed iff no S1 postmortem is open
    pub async fn can_deploy(&self) -> Result<(bool, String), HeliosError> {
        let open = self
            .store
            .open_postmortems_by_severity(PostmortemSeverity::S1)
            .await?;

        if open.is_empty() {
            return Ok((true, "deployments allowed".to_string()));
        }

        let ids: Vec<&str> = open.iter().map(|p| p.postmortem_id.as_str()).collect();
        Ok((
            false,
            format!(
                "deployment blocked: {} open severity-1 postmortem(s): {}",
                open.len(),
                ids.join(", ")
            ),
        ))
    }

    /// Closing a postmortem requires a root cause and at least one
    /// corrective action.
    pub async fn complete_postmortem(
        &self,
        postmortem_id: &str,
        root_cause: &str,
        corrective_actions: &[String],
    ) -> Result<Postmortem, HeliosError> {
        if root_cause.trim().is_empty() || corrective_actions.is_empty() {
            return Err(HeliosError::IncompletePostmortem);
        }

        let _guard = self.postmortem_lock.lock().await;
        let postmortem = self
            .store
            .close_postmortem(postmortem_id, root_cause, corrective_actions)
            .await?;
        drop(_guard);

        self.events.publish(EngineEvent::PostmortemClosed {
            postmortem_id: postmortem_id.to_string(),
        });

        let (allowed, _) = self.can_deploy().await?;
        if allowed {
            info!("Helios: all severity-1 postmortems resolved; deployments unblocked");
        }

        Ok(postmortem)
    }

    pub async fn mark_version_stable(
        &self,
        version_id: &str,
        deployment_id: Option<&str>,
    ) -> Result<(), HeliosError> {
        self.store.mark_version_stable(version_id, deployment_id).await
    }

    pub async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentRecord, HeliosError> {
        self.store.get_deployment(deployment_id).await
    }

    pub async fn status(&self) -> Result<HeliosStatus, HeliosError> {
        let (total, rolled_back) = self.store.deployment_counts().await?;
        let open_by_rank = self.store.open_postmortem_counts().await?;
        let open_postmortems = open_by_rank
            .into_iter()
            .map(|(rank, count)| (format!("S{}", rank), count))
            .collect();
        let stable = self.store.current_stable_version().await?;
        let (can_deploy, message) = self.can_deploy().await?;

        Ok(HeliosStatus {
            total_deployments: total,
            rolled_back_deployments: rolled_back,
            open_postmortems,
            rollbacks_recorded: self.store.rollback_count().await?,
            current_stable_version: stable.map(|v| v.version_id),
            can_deploy,
            deploy_status_message: message,
        })
    }

    /// Recovery sweep: guarantees that any deployment holding a NO-GO
    /// reaches ROLLED_BACK within one monitoring interval even if its
    /// original worker died.
    pub fn spawn_monitor(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let protocol = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(protocol.monitoring_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                "Helios: monitoring every {:?}",
                protocol.monitoring_interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match protocol.store.pending_no_go_deployments().await {
                            Ok(pending) => {
                                for (deployment_id, phase, reason) in pending {
                                    warn!(
                                        "Helios monitor: {} still not rolled back, re-triggering",
                                        deployment_id
                                    );
                                    let phase = HeliosPhase::from_str(&phase)
                                        .unwrap_or(HeliosPhase::Monitoring);
                                    protocol
                                        .execute_rollback(&deployment_id, phase, &reason)
                                        .await;
                                }
                            }
                            Err(e) => error!("Helios monitor: sweep failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Helios: monitoring stopped");
                            break;
                        }
                    }
                }
            }
        });
    }
}
