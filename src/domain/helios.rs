use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment phases, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeliosPhase {
    PreDeployment,
    Deployment,
    PostDeployment,
    Verification,
    Monitoring,
}

impl HeliosPhase {
    pub const ALL: [HeliosPhase; 5] = [
        HeliosPhase::PreDeployment,
        HeliosPhase::Deployment,
        HeliosPhase::PostDeployment,
        HeliosPhase::Verification,
        HeliosPhase::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HeliosPhase::PreDeployment => "PRE_DEPLOYMENT",
            HeliosPhase::Deployment => "DEPLOYMENT",
            HeliosPhase::PostDeployment => "POST_DEPLOYMENT",
            HeliosPhase::Verification => "VERIFICATION",
            HeliosPhase::Monitoring => "MONITORING",
        }
    }
}

impl fmt::Display for HeliosPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HeliosPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRE_DEPLOYMENT" => Ok(HeliosPhase::PreDeployment),
            "DEPLOYMENT" => Ok(HeliosPhase::Deployment),
            "POST_DEPLOYMENT" => Ok(HeliosPhase::PostDeployment),
            "VERIFICATION" => Ok(HeliosPhase::Verification),
            "MONITORING" => Ok(HeliosPhase::Monitoring),
            _ => anyhow::bail!("Unknown deployment phase: {}", s),
        }
    }
}

/// Per-phase gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseOutcome {
    Go,
    NoGo,
    Pending,
}

impl PhaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseOutcome::Go => "GO",
            PhaseOutcome::NoGo => "NO_GO",
            PhaseOutcome::Pending => "PENDING",
        }
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhaseOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GO" => Ok(PhaseOutcome::Go),
            "NO_GO" | "NO-GO" => Ok(PhaseOutcome::NoGo),
            "PENDING" => Ok(PhaseOutcome::Pending),
            _ => anyhow::bail!("Unknown phase outcome: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Deployed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::Deployed => "DEPLOYED",
            DeploymentStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DeploymentStatus::Pending),
            "IN_PROGRESS" => Ok(DeploymentStatus::InProgress),
            "DEPLOYED" => Ok(DeploymentStatus::Deployed),
            "ROLLED_BACK" => Ok(DeploymentStatus::RolledBack),
            _ => anyhow::bail!("Unknown deployment status: {}", s),
        }
    }
}

/// Postmortem severity. S1 blocks all deployments while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PostmortemSeverity {
    S1,
    S2,
    S3,
    S4,
}

impl PostmortemSeverity {
    pub fn rank(&self) -> i64 {
        match self {
            PostmortemSeverity::S1 => 1,
            PostmortemSeverity::S2 => 2,
            PostmortemSeverity::S3 => 3,
            PostmortemSeverity::S4 => 4,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(PostmortemSeverity::S1),
            2 => Some(PostmortemSeverity::S2),
            3 => Some(PostmortemSeverity::S3),
            4 => Some(PostmortemSeverity::S4),
            _ => None,
        }
    }
}

impl fmt::Display for PostmortemSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostmortemStatus {
    Open,
    Closed,
}

impl PostmortemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostmortemStatus::Open => "OPEN",
            PostmortemStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for PostmortemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,
    pub version: String,
    pub description: String,
    pub status: DeploymentStatus,
    pub stable_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDecision {
    pub deployment_id: String,
    pub phase: HeliosPhase,
    pub outcome: PhaseOutcome,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postmortem {
    pub postmortem_id: String,
    pub deployment_id: String,
    pub severity: PostmortemSeverity,
    pub title: String,
    pub description: String,
    pub root_cause: Option<String>,
    pub corrective_actions: Vec<String>,
    pub status: PostmortemStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_id: String,
    pub deployment_id: String,
    pub trigger_phase: HeliosPhase,
    pub trigger_reason: String,
    pub from_version: String,
    pub to_version: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableVersion {
    pub version_id: String,
    pub deployment_id: Option<String>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_roundtrip() {
        assert_eq!(HeliosPhase::ALL.len(), 5);
        assert_eq!(HeliosPhase::ALL[0], HeliosPhase::PreDeployment);
        assert_eq!(HeliosPhase::ALL[4], HeliosPhase::Monitoring);

        for phase in HeliosPhase::ALL {
            assert_eq!(phase.as_str().parse::<HeliosPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_outcome_accepts_dashed_no_go() {
        assert_eq!("NO-GO".parse::<PhaseOutcome>().unwrap(), PhaseOutcome::NoGo);
        assert_eq!("no_go".parse::<PhaseOutcome>().unwrap(), PhaseOutcome::NoGo);
    }

    #[test]
    fn test_severity_ranks() {
        assert_eq!(PostmortemSeverity::S1.rank(), 1);
        assert_eq!(PostmortemSeverity::from_rank(4), Some(PostmortemSeverity::S4));
        assert_eq!(PostmortemSeverity::from_rank(9), None);
        assert!(PostmortemSeverity::S1 < PostmortemSeverity::S2);
    }
}
