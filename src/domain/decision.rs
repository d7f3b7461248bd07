use crate::domain::signal::{BotCategory, SignalAction};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Per-category aggregation weights. Unlisted categories weigh zero.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryWeights(pub HashMap<BotCategory, f64>);

// Category names as string keys so the weight table survives JSON
impl Serialize for CategoryWeights {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (category, weight) in &self.0 {
            map.serialize_entry(category.as_str(), weight)?;
        }
        map.end()
    }
}

impl CategoryWeights {
    pub fn get(&self, category: BotCategory) -> f64 {
        self.0.get(&category).copied().unwrap_or(0.0)
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert(BotCategory::AiMl, 0.25);
        weights.insert(BotCategory::Strategy, 0.20);
        weights.insert(BotCategory::Indicator, 0.15);
        weights.insert(BotCategory::Risk, 0.20);
        weights.insert(BotCategory::Protection, 0.15);
        weights.insert(BotCategory::General, 0.05);
        // Execution bots steer order slicing, not direction
        weights.insert(BotCategory::Execution, 0.0);
        Self(weights)
    }
}

/// A risk veto that forced the final action
#[derive(Debug, Clone, Serialize)]
pub struct VetoRecord {
    pub bot_name: String,
    pub confidence: f64,
    pub reason: String,
}

/// The single per-symbol outcome of one orchestration cycle
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub symbol: String,
    pub final_action: SignalAction,
    pub confidence: f64,
    pub contributing_signals: usize,
    pub stale_signals: usize,
    pub errored_signals: usize,
    /// min(buy_weight, sell_weight) / (buy_weight + sell_weight)
    pub dissent_ratio: f64,
    pub weights_applied: CategoryWeights,
    pub veto: Option<VetoRecord>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn hold(symbol: impl Into<String>, weights: CategoryWeights) -> Self {
        Self {
            symbol: symbol.into(),
            final_action: SignalAction::Hold,
            confidence: 0.0,
            contributing_signals: 0,
            stale_signals: 0,
            errored_signals: 0,
            dissent_ratio: 0.0,
            weights_applied: weights,
            veto: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.final_action != SignalAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_match_operational_config() {
        let w = CategoryWeights::default();
        assert_eq!(w.get(BotCategory::AiMl), 0.25);
        assert_eq!(w.get(BotCategory::Strategy), 0.20);
        assert_eq!(w.get(BotCategory::Indicator), 0.15);
        assert_eq!(w.get(BotCategory::Risk), 0.20);
        assert_eq!(w.get(BotCategory::Protection), 0.15);
        assert_eq!(w.get(BotCategory::General), 0.05);
        assert_eq!(w.get(BotCategory::Execution), 0.0);
    }

    #[test]
    fn test_hold_decision_not_actionable() {
        let d = Decision::hold("BTC/USDT", CategoryWeights::default());
        assert!(!d.is_actionable());
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_weights_serialize_with_string_keys() {
        let json = serde_json::to_value(CategoryWeights::default()).unwrap();
        assert_eq!(json["AI_ML"], 0.25);
        assert_eq!(json["PROTECTION"], 0.15);
    }

    #[test]
    fn test_decision_serializes_for_audit() {
        let d = Decision::hold("BTC/USDT", CategoryWeights::default());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["symbol"], "BTC/USDT");
        assert_eq!(json["final_action"], "Hold");
        assert!(json["weights_applied"].is_object());
    }
}
