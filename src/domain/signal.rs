use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Functional grouping of a bot, used for decision weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotCategory {
    AiMl,
    Strategy,
    Indicator,
    Risk,
    Execution,
    Protection,
    General,
}

impl BotCategory {
    pub const ALL: [BotCategory; 7] = [
        BotCategory::AiMl,
        BotCategory::Strategy,
        BotCategory::Indicator,
        BotCategory::Risk,
        BotCategory::Execution,
        BotCategory::Protection,
        BotCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotCategory::AiMl => "AI_ML",
            BotCategory::Strategy => "STRATEGY",
            BotCategory::Indicator => "INDICATOR",
            BotCategory::Risk => "RISK",
            BotCategory::Execution => "EXECUTION",
            BotCategory::Protection => "PROTECTION",
            BotCategory::General => "GENERAL",
        }
    }
}

impl fmt::Display for BotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BotCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AI_ML" => Ok(BotCategory::AiMl),
            "STRATEGY" => Ok(BotCategory::Strategy),
            "INDICATOR" => Ok(BotCategory::Indicator),
            "RISK" => Ok(BotCategory::Risk),
            "EXECUTION" => Ok(BotCategory::Execution),
            "PROTECTION" => Ok(BotCategory::Protection),
            "GENERAL" => Ok(BotCategory::General),
            _ => anyhow::bail!("Unknown bot category: {}", s),
        }
    }
}

/// A bot's directional opinion for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// +1 for BUY, -1 for SELL, 0 for HOLD
    pub fn direction_sign(&self) -> f64 {
        match self {
            SignalAction::Buy => 1.0,
            SignalAction::Sell => -1.0,
            SignalAction::Hold => 0.0,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// One bot's per-cycle output. Confidence is clamped to [0, 1] at
/// construction so downstream aggregation never sees out-of-range values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub bot_name: String,
    pub category: BotCategory,
    pub action: SignalAction,
    pub confidence: f64,
    pub reason: String,
    /// Opaque audit payload, e.g. the indicator values behind the call
    pub indicators: serde_json::Map<String, serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        bot_name: impl Into<String>,
        category: BotCategory,
        action: SignalAction,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            category,
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            indicators: serde_json::Map::new(),
            emitted_at: Utc::now(),
        }
    }

    /// An abstain: contributes to the bucket count but never conflicts
    pub fn hold(bot_name: impl Into<String>, category: BotCategory, reason: impl Into<String>) -> Self {
        Self::new(bot_name, category, SignalAction::Hold, 0.0, reason)
    }

    pub fn with_indicator(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.indicators.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let s = Signal::new("x", BotCategory::Strategy, SignalAction::Buy, 1.7, "r");
        assert_eq!(s.confidence, 1.0);
        let s = Signal::new("x", BotCategory::Strategy, SignalAction::Sell, -0.2, "r");
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn test_direction_signs() {
        assert_eq!(SignalAction::Buy.direction_sign(), 1.0);
        assert_eq!(SignalAction::Sell.direction_sign(), -1.0);
        assert_eq!(SignalAction::Hold.direction_sign(), 0.0);
    }

    #[test]
    fn test_category_roundtrip() {
        for cat in BotCategory::ALL {
            assert_eq!(cat.as_str().parse::<BotCategory>().unwrap(), cat);
        }
        assert!("ORACLE".parse::<BotCategory>().is_err());
    }

    #[test]
    fn test_indicator_payload() {
        let s = Signal::new("rsi_oracle", BotCategory::Indicator, SignalAction::Buy, 0.6, "oversold")
            .with_indicator("rsi", 24.3);
        assert_eq!(s.indicators.get("rsi").and_then(|v| v.as_f64()), Some(24.3));
    }
}
