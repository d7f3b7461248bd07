//! Plain rate-of-change rider over a short lookback.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::sync::Arc;

const LOOKBACK: usize = 10;
/// Minimum absolute rate of change to act on
const THRESHOLD: f64 = 0.005;

pub struct MomentumRider {
    core: BotCore,
}

impl MomentumRider {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("momentum_rider", "1.1.0"),
        }
    }
}

impl Default for MomentumRider {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(MomentumRider::new()))
}

impl Bot for MomentumRider {
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
}

#[async_trait]
impl SignalAnalyzer for MomentumRider {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let closes = snapshot.closes_f64();
        if closes.len() < LOOKBACK {
            return Ok(None);
        }

        let window = &closes[closes.len() - LOOKBACK..];
        let first = window[0];
        let last = window[window.len() - 1];
        if first <= 0.0 {
            return Ok(None);
        }

        let rate_of_change = last / first - 1.0;

        let (action, confidence) = if rate_of_change >= THRESHOLD {
            (
                SignalAction::Buy,
                (rate_of_change / (THRESHOLD * 8.0)).min(0.9),
            )
        } else if rate_of_change <= -THRESHOLD {
            (
                SignalAction::Sell,
                (-rate_of_change / (THRESHOLD * 8.0)).min(0.9),
            )
        } else {
            (SignalAction::Hold, 0.0)
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::General,
                action,
                confidence,
                format!("{}-bar rate of change {:.2}%", LOOKBACK, rate_of_change * 100.0),
            )
            .with_indicator("rate_of_change", rate_of_change),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::builtin::test_support::{falling, rising, snapshot_with_closes};

    #[tokio::test]
    async fn test_strong_rally_buys() {
        let bot = MomentumRider::new();
        let snap = snapshot_with_closes("BTC/USDT", &rising(50_000.0, 0.004, 15));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_selloff_sells() {
        let bot = MomentumRider::new();
        let snap = snapshot_with_closes("BTC/USDT", &falling(50_000.0, 0.004, 15));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[tokio::test]
    async fn test_flat_market_holds() {
        let bot = MomentumRider::new();
        let closes = vec![50_000.0; 15];
        let snap = snapshot_with_closes("BTC/USDT", &closes);

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[tokio::test]
    async fn test_confidence_caps_at_limit() {
        let bot = MomentumRider::new();
        let snap = snapshot_with_closes("BTC/USDT", &rising(50_000.0, 0.05, 15));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert!((signal.confidence - 0.9).abs() < 1e-9);
    }
}
