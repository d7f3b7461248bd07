//! Asset-protection bot: surfaces the rug shield's verdict as a signal so
//! unsafe symbols are voted against even before order time.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, SignalAnalyzer};
use crate::application::safety::SafetyEnvelope;
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{BotCategory, Signal, SignalAction};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RugShieldBot {
    core: BotCore,
    envelope: Arc<SafetyEnvelope>,
}

impl RugShieldBot {
    pub fn new(envelope: Arc<SafetyEnvelope>) -> Self {
        Self {
            core: BotCore::new("rug_shield", "2.1.0"),
            envelope,
        }
    }
}

pub fn build(context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(RugShieldBot::new(Arc::clone(&context.envelope))))
}

impl Bot for RugShieldBot {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        let mut status = self.core.status();
        status.metrics.insert(
            "assets_checked".to_string(),
            self.envelope.shield().checked_count().into(),
        );
        status.metrics.insert(
            "assets_blocked".to_string(),
            self.envelope.shield().blocked_count().into(),
        );
        status
    }

    fn as_analyzer(&self) -> Option<&dyn SignalAnalyzer> {
        Some(self)
    }
}

#[async_trait]
impl SignalAnalyzer for RugShieldBot {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> anyhow::Result<Option<Signal>> {
        let assessment = self.envelope.shield().assess_snapshot(snapshot).await;

        let (action, confidence) = if assessment.safe {
            (SignalAction::Hold, 0.0)
        } else {
            // Risk score maps into [0.5, 1.0]
            (SignalAction::Sell, 0.5 + assessment.score as f64 / 200.0)
        };

        self.core.note_signal();
        Ok(Some(
            Signal::new(
                self.core.name(),
                BotCategory::Protection,
                action,
                confidence,
                if assessment.reasons.is_empty() {
                    "asset passed safety screen".to_string()
                } else {
                    assessment.reasons.join("; ")
                },
            )
            .with_indicator("risk_score", assessment.score),
        ))
    }
}
