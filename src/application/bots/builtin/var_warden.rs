//! Historical value-at-risk warden. Emits a high-confidence SELL when the
//! tail loss estimate breaches its limit; the orchestrator treats such
//! signals as veto-capable.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::sync::Arc;

const MIN_HISTORY: usize = 30;
/// 95% one-tail historical VaR limit, as a loss fraction
const VAR_LIMIT: f64 = 0.04;

pub struct VarWarden {
    core: BotCore,
}

impl VarWarden {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("var_warden", "1.0.1"),
        }
    }

    /// 5th-percentile return of the series (a negative number in stress)
    fn var_95(closes: &[f64]) -> Option<f64> {
        if closes.len() < MIN_HISTORY {
            return None;
        }

        let mut returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        if returns.is_empty() {
            return None;
        }

        returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = (returns.len() as f64 * 0.05).floor() as usize;
        returns.get(index.min(returns.len() - 1)).copied()
    }
}

impl Default for VarWarden {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(VarWarden::new()))
}

impl Bot for VarWarden {
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
impl SignalAnalyzer for VarWarden {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let Some(var_95) = Self::var_95(&snapshot.closes_f64()) else {
            return Ok(None);
        };

        let loss = -var_95;
        let (action, confidence) = if loss >= VAR_LIMIT {
            // Past the limit the confidence starts in veto territory
            (SignalAction::Sell, (0.9 + (loss - VAR_LIMIT) * 2.0).min(0.99))
        } else {
            (SignalAction::Hold, 0.0)
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::Risk,
                action,
                confidence,
                format!("historical VaR(95) {:.2}%", var_95 * 100.0),
            )
            .with_indicator("var_95", var_95),
        ))
    }
}
