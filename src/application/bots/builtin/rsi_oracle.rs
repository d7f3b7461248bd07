//! RSI oversold/overbought caller.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, FeatureSource, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use ta::Next;
use ta::indicators::RelativeStrengthIndex;

const PERIOD: usize = 14;
const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;

pub struct RsiOracle {
    core: BotCore,
}

impl RsiOracle {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("rsi_oracle", "1.4.0"),
        }
    }

    /// RSI of the full close series, None when history is too short
    fn rsi(closes: &[f64]) -> Option<f64> {
        if closes.len() < PERIOD + 1 {
            return None;
        }
        let mut indicator = RelativeStrengthIndex::new(PERIOD).ok()?;
        let mut value = 50.0;
        for close in closes {
            value = indicator.next(*close);
        }
        Some(value)
    }
}

impl Default for RsiOracle {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(RsiOracle::new()))
}

impl Bot for RsiOracle {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        self.core.status()
    }

    fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
        Some(self)
    }

    fn as_feature_source(&self) -> Option<&dyn FeatureSource> {
        Some(self)
    }
}

#[async_trait]
impl SignalAnalyzer for RsiOracle {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let Some(rsi) = Self::rsi(&snapshot.closes_f64()) else {
            return Ok(None);
        };

        let (action, confidence) = if rsi <= OVERSOLD {
            // Deeper oversold -> stronger conviction
            (SignalAction::Buy, 0.5 + (OVERSOLD - rsi) / OVERSOLD * 0.5)
        } else if rsi >= OVERBOUGHT {
            (
                SignalAction::Sell,
                0.5 + (rsi - OVERBOUGHT) / (100.0 - OVERBOUGHT) * 0.5,
            )
        } else {
            (SignalAction::Hold, 0.0)
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::Indicator,
                action,
                confidence,
                format!("RSI({}) = {:.1}", PERIOD, rsi),
            )
            .with_indicator("rsi", rsi),
        ))
    }
}

#[async_trait]
impl FeatureSource for RsiOracle {
    async fn features(&self, snapshot: &MarketSnapshot) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        if let Some(rsi) = Self::rsi(&snapshot.closes_f64()) {
            features.insert("rsi_14".to_string(), rsi);
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::builtin::test_support::{falling, rising, snapshot_with_closes};

    #[tokio::test]
    async fn test_persistent_selloff_is_oversold_buy() {
        let bot = RsiOracle::new();
        let snap = snapshot_with_closes("BTC/USDT", &falling(50_000.0, 0.01, 40));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence >= 0.5);
        assert!(signal.indicators["rsi"].as_f64().unwrap() < OVERSOLD);
    }

    #[tokio::test]
    async fn test_persistent_rally_is_overbought_sell() {
        let bot = RsiOracle::new();
        let snap = snapshot_with_closes("BTC/USDT", &rising(50_000.0, 0.01, 40));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.indicators["rsi"].as_f64().unwrap() > OVERBOUGHT);
    }

    #[tokio::test]
    async fn test_choppy_market_holds() {
        let bot = RsiOracle::new();
        let closes: Vec<f64> = (0..40)
            .map(|i| 50_000.0 * if i % 2 == 0 { 1.001 } else { 0.999 })
            .collect();
        let snap = snapshot_with_closes("BTC/USDT", &closes);

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[tokio::test]
    async fn test_short_history_abstains() {
        let bot = RsiOracle::new();
        let snap = snapshot_with_closes("BTC/USDT", &rising(50_000.0, 0.01, 5));
        assert!(bot.analyze(&snap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_feature_contribution() {
        let bot = RsiOracle::new();
        let snap = snapshot_with_closes("BTC/USDT", &rising(50_000.0, 0.01, 40));

        let features = bot.features(&snap).await;
        assert!(features.contains_key("rsi_14"));
    }
}
