//! MACD crossover herald.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, FeatureSource, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use ta::Next;
use ta::indicators::MovingAverageConvergenceDivergence;

const FAST: usize = 12;
const SLOW: usize = 26;
const SIGNAL: usize = 9;
/// Enough bars for the slow EMA plus signal line to settle
const MIN_HISTORY: usize = SLOW + SIGNAL;

#[derive(Debug, Clone, Copy)]
struct MacdReading {
    histogram: f64,
    previous_histogram: f64,
    price: f64,
}

pub struct MacdHerald {
    core: BotCore,
}

impl MacdHerald {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("macd_herald", "1.2.0"),
        }
    }

    fn read(closes: &[f64]) -> Option<MacdReading> {
        if closes.len() < MIN_HISTORY {
            return None;
        }

        let mut macd = MovingAverageConvergenceDivergence::new(FAST, SLOW, SIGNAL).ok()?;
        let mut histogram = 0.0;
        let mut previous_histogram = 0.0;
        for close in closes {
            previous_histogram = histogram;
            histogram = macd.next(*close).histogram;
        }

        Some(MacdReading {
            histogram,
            previous_histogram,
            price: *closes.last()?,
        })
    }
}

impl Default for MacdHerald {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(MacdHerald::new()))
}

impl Bot for MacdHerald {
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
impl SignalAnalyzer for MacdHerald {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let Some(reading) = Self::read(&snapshot.closes_f64()) else {
            return Ok(None);
        };

        // Histogram sign carries direction; widening carries conviction
        let widening = reading.histogram.abs() > reading.previous_histogram.abs();
        let strength = if reading.price > 0.0 {
            (reading.histogram.abs() / reading.price * 2_000.0).min(1.0)
        } else {
            0.0
        };

        let (action, confidence) = if reading.histogram > 0.0 && widening {
            (SignalAction::Buy, (0.3 + strength * 0.5).min(0.8))
        } else if reading.histogram < 0.0 && widening {
            (SignalAction::Sell, (0.3 + strength * 0.5).min(0.8))
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
                format!(
                    "MACD({},{},{}) histogram {:.2}",
                    FAST, SLOW, SIGNAL, reading.histogram
                ),
            )
            .with_indicator("macd_histogram", reading.histogram),
        ))
    }
}

#[async_trait]
impl FeatureSource for MacdHerald {
    async fn features(&self, snapshot: &MarketSnapshot) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        if let Some(reading) = Self::read(&snapshot.closes_f64()) {
            features.insert("macd_histogram".to_string(), reading.histogram);
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::builtin::test_support::snapshot_with_closes;

    /// Flat base then an accelerating move in one direction
    fn breakout(direction: f64) -> Vec<f64> {
        let mut closes = vec![50_000.0; 40];
        let mut price = 50_000.0;
        for i in 0..15 {
            price *= 1.0 + direction * 0.002 * (i as f64 + 1.0) / 5.0;
            closes.push(price);
        }
        closes
    }

    #[tokio::test]
    async fn test_upward_breakout_buys() {
        let bot = MacdHerald::new();
        let snap = snapshot_with_closes("ETH/USDT", &breakout(1.0));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_downward_breakout_sells() {
        let bot = MacdHerald::new();
        let snap = snapshot_with_closes("ETH/USDT", &breakout(-1.0));

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[tokio::test]
    async fn test_flat_series_holds() {
        let bot = MacdHerald::new();
        let snap = snapshot_with_closes("ETH/USDT", &vec![50_000.0; 50]);

        let signal = bot.analyze(&snap).await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[tokio::test]
    async fn test_short_history_abstains() {
        let bot = MacdHerald::new();
        let snap = snapshot_with_closes("ETH/USDT", &vec![50_000.0; 10]);
        assert!(bot.analyze(&snap).await.unwrap().is_none());
    }
}
