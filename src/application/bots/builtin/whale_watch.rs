//! Stateful volume monitor. Emits no signals; maintains a per-symbol
//! volume baseline and contributes a surge ratio to the intelligence
//! bundle.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, FeatureSource, MarketObserver};
use crate::domain::market::MarketSnapshot;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// EMA smoothing for the volume baseline
const ALPHA: f64 = 0.1;
/// Ratio above which we call the flow unusual
const SURGE_RATIO: f64 = 3.0;

pub struct WhaleWatch {
    core: BotCore,
    baselines: RwLock<HashMap<String, f64>>,
}

impl WhaleWatch {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("whale_watch", "1.0.0"),
            baselines: RwLock::new(HashMap::new()),
        }
    }

    async fn surge_ratio(&self, snapshot: &MarketSnapshot) -> f64 {
        let volume = snapshot.volume_24h.to_f64().unwrap_or(0.0);
        let baselines = self.baselines.read().await;
        match baselines.get(&snapshot.symbol) {
            Some(baseline) if *baseline > 0.0 => volume / baseline,
            _ => 1.0,
        }
    }
}

impl Default for WhaleWatch {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(WhaleWatch::new()))
}

impl Bot for WhaleWatch {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        let mut status = self.core.status();
        let tracked = self
            .baselines
            .try_read()
            .map(|b| b.len())
            .unwrap_or_default();
        status
            .metrics
            .insert("symbols_tracked".to_string(), tracked.into());
        status
    }

    fn as_observer(&self) -> Option<&dyn MarketObserver> {
        Some(self)
    }

    fn as_feature_source(&self) -> Option<&dyn FeatureSource> {
        Some(self)
    }
}

#[async_trait]
impl MarketObserver for WhaleWatch {
    async fn update(&self, snapshot: &MarketSnapshot) {
        let volume = snapshot.volume_24h.to_f64().unwrap_or(0.0);
        let ratio = self.surge_ratio(snapshot).await;

        let mut baselines = self.baselines.write().await;
        let baseline = baselines
            .entry(snapshot.symbol.clone())
            .or_insert(volume);
        *baseline = *baseline * (1.0 - ALPHA) + volume * ALPHA;

        if ratio >= SURGE_RATIO {
            info!(
                "WhaleWatch: unusual volume on {} ({:.1}x baseline)",
                snapshot.symbol, ratio
            );
        }
    }
}

#[async_trait]
impl FeatureSource for WhaleWatch {
    async fn features(&self, snapshot: &MarketSnapshot) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        features.insert(
            "whale_volume_ratio".to_string(),
            self.surge_ratio(snapshot).await,
        );
        features
    }
}
