//! Sequence-model sentinel. The model itself is a black box behind
//! [`SignalModel`]; the default implementation scores normalized momentum
//! so the engine runs without any trained weights on disk.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, SignalAnalyzer};
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::sync::Arc;

const MIN_HISTORY: usize = 20;
const ACTION_THRESHOLD: f64 = 0.25;

/// Inference seam: anything that turns a close series into a directional
/// score in [-1, 1]
pub trait SignalModel: Send + Sync {
    fn model_name(&self) -> &str;
    fn score(&self, closes: &[f64]) -> f64;
}

/// Default model: momentum over the window, normalized by realized
/// volatility and squashed into [-1, 1]
pub struct NormalizedMomentumModel;

impl SignalModel for NormalizedMomentumModel {
    fn model_name(&self) -> &str {
        "normalized_momentum"
    }

    fn score(&self, closes: &[f64]) -> f64 {
        if closes.len() < 2 {
            return 0.0;
        }

        let first = closes[0];
        let last = closes[closes.len() - 1];
        if first <= 0.0 {
            return 0.0;
        }
        let momentum = last / first - 1.0;

        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len().max(1) as f64;
        let variance = returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / returns.len().max(1) as f64;
        let volatility = variance.sqrt().max(1e-6);

        (momentum / (volatility * (returns.len() as f64).sqrt())).tanh()
    }
}

pub struct LstmSentinel {
    core: BotCore,
    model: Arc<dyn SignalModel>,
}

impl LstmSentinel {
    pub fn new(model: Arc<dyn SignalModel>) -> Self {
        Self {
            core: BotCore::new("lstm_sentinel", "2.0.0"),
            model,
        }
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(LstmSentinel::new(Arc::new(
        NormalizedMomentumModel,
    ))))
}

impl Bot for LstmSentinel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        let mut status = self.core.status();
        status
            .metrics
            .insert("model".to_string(), self.model.model_name().into());
        status
    }

    fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
        Some(self)
    }
}

#[async_trait]
impl SignalAnalyzer for LstmSentinel {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let closes = snapshot.closes_f64();
        if closes.len() < MIN_HISTORY {
            return Ok(Some(Signal::hold(
                self.core.name(),
                BotCategory::AiMl,
                "insufficient history for inference",
            )));
        }

        let score = self.model.score(&closes);

        let action = if score >= ACTION_THRESHOLD {
            SignalAction::Buy
        } else if score <= -ACTION_THRESHOLD {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        };

        let confidence = if action == SignalAction::Hold {
            0.0
        } else {
            score.abs()
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::AiMl,
                action,
                confidence,
                format!("{} score {:.3}", self.model.model_name(), score),
            )
            .with_indicator("model_score", score),
        ))
    }
}
