//! Execution pacer: recommends how many time slices a parent order should
//! be cut into given current liquidity. Contributes features only; it has
//! no directional opinion.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, FeatureSource};
use crate::domain::market::MarketSnapshot;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;

const MIN_SLICES: f64 = 1.0;
const MAX_SLICES: f64 = 12.0;

pub struct TwapPacer {
    core: BotCore,
}

impl TwapPacer {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("twap_pacer", "0.9.0"),
        }
    }

    /// Thin books and wide spreads ask for more, smaller slices
    fn recommended_slices(snapshot: &MarketSnapshot) -> f64 {
        let spread = snapshot.spread_pct.to_f64().unwrap_or(1.0);
        let volume = snapshot.volume_24h.to_f64().unwrap_or(0.0);

        let spread_pressure = (spread / 0.1).clamp(0.0, 6.0);
        let liquidity_relief = (volume / 10_000.0).clamp(0.0, 5.0);

        (MIN_SLICES + spread_pressure + (5.0 - liquidity_relief)).clamp(MIN_SLICES, MAX_SLICES)
    }
}

impl Default for TwapPacer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(TwapPacer::new()))
}

impl Bot for TwapPacer {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        self.core.status()
    }

    fn as_feature_source(&self) -> Option<&dyn FeatureSource> {
        Some(self)
    }
}

#[async_trait]
impl FeatureSource for TwapPacer {
    async fn features(&self, snapshot: &MarketSnapshot) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        features.insert(
            "twap_slices".to_string(),
            Self::recommended_slices(snapshot).round(),
        );
        features
    }
}
