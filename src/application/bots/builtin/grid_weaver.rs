//! Grid-band strategy: quotes interest near the edges of the recent
//! trading range and stands aside in the middle.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

const LOOKBACK: usize = 20;
/// Band position below which we accumulate / above which we distribute
const LOWER_EDGE: f64 = 0.25;
const UPPER_EDGE: f64 = 0.75;

pub struct GridWeaver {
    core: BotCore,
}

impl GridWeaver {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("grid_weaver", "1.3.0"),
        }
    }
}

impl Default for GridWeaver {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(GridWeaver::new()))
}

impl Bot for GridWeaver {
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
impl SignalAnalyzer for GridWeaver {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        if snapshot.ohlcv.len() < LOOKBACK {
            return Ok(None);
        }

        let window = &snapshot.ohlcv[snapshot.ohlcv.len() - LOOKBACK..];
        let high = window
            .iter()
            .map(|r| r.high)
            .max()
            .unwrap_or(snapshot.last_price);
        let low = window
            .iter()
            .map(|r| r.low)
            .min()
            .unwrap_or(snapshot.last_price);

        let range = (high - low).to_f64().unwrap_or(0.0);
        if range <= 0.0 {
            return Ok(None);
        }

        let price = snapshot.last_price.to_f64().unwrap_or(0.0);
        let band_position = (price - low.to_f64().unwrap_or(price)) / range;

        let (action, confidence) = if band_position <= LOWER_EDGE {
            (
                SignalAction::Buy,
                ((LOWER_EDGE - band_position) / LOWER_EDGE * 0.8).min(0.8),
            )
        } else if band_position >= UPPER_EDGE {
            (
                SignalAction::Sell,
                ((band_position - UPPER_EDGE) / (1.0 - UPPER_EDGE) * 0.8).min(0.8),
            )
        } else {
            (SignalAction::Hold, 0.0)
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::Strategy,
                action,
                confidence,
                format!("price at {:.0}% of {}-bar range", band_position * 100.0, LOOKBACK),
            )
            .with_indicator("band_position", band_position),
        ))
    }
}
