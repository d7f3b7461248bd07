pub mod base;
pub mod builtin;
pub mod registry;

pub use base::{BotContext, BotCore};
pub use registry::{BotDescriptor, BotRegistry, CategoryRules, DiscoveryReport, RegistryStatus};

use crate::domain::market::MarketSnapshot;
use crate::domain::position::Position;
use crate::domain::signal::Signal;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Health and metrics payload every bot reports
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub name: String,
    pub version: String,
    pub healthy: bool,
    pub metrics: serde_json::Map<String, serde_json::Value>,
}

/// Signal-producing capability
#[async_trait]
pub trait SignalAnalyzer: Send + Sync {
    /// None means the bot has no opinion this cycle (distinct from HOLD)
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>>;
}

/// Stateful bots that consume snapshots without emitting signals
#[async_trait]
pub trait MarketObserver: Send + Sync {
    async fn update(&self, snapshot: &MarketSnapshot);
}

/// Verdict from a protection bot for one open position
#[derive(Debug, Clone, Default)]
pub struct GuardianVerdict {
    /// Close the position for this reason
    pub close: Option<String>,
    /// Move the protective stop to this price
    pub adjust_stop: Option<Decimal>,
}

/// Position-protection capability
#[async_trait]
pub trait PositionGuardian: Send + Sync {
    async fn evaluate(&self, position: &Position, tick: &MarketSnapshot) -> GuardianVerdict;
}

/// Feature contribution to the per-cycle intelligence bundle
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn features(&self, snapshot: &MarketSnapshot) -> HashMap<String, f64>;
}

/// Common bot contract. Capabilities are advertised through the `as_*`
/// accessors; callers route work by capability, never by name or category.
pub trait Bot: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn status(&self) -> BotStatus;

    fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
        None
    }

    fn as_observer(&self) -> Option<&dyn MarketObserver> {
        None
    }

    fn as_guardian(&self) -> Option<&dyn PositionGuardian> {
        None
    }

    fn as_feature_source(&self) -> Option<&dyn FeatureSource> {
        None
    }
}
