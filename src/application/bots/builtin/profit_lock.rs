//! Profit-lock guardian: once a position shows enough gain it moves the
//! stop to breakeven, and closes outright when too much of the peak gain
//! has been given back.

use crate::application::bots::{Bot, BotContext, BotCore, BotStatus, GuardianVerdict, PositionGuardian};
use crate::domain::market::MarketSnapshot;
use crate::domain::position::{Position, PositionSide};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gain (as a fraction of entry) required before the lock engages
const LOCK_THRESHOLD: Decimal = dec!(0.015);
/// Fraction of the peak gain we allow to evaporate before closing
const GIVE_BACK: Decimal = dec!(0.4);

pub struct ProfitLock {
    core: BotCore,
    peaks: RwLock<HashMap<String, Decimal>>,
}

impl ProfitLock {
    pub fn new() -> Self {
        Self {
            core: BotCore::new("profit_lock", "1.6.0"),
            peaks: RwLock::new(HashMap::new()),
        }
    }

    /// Favorable move as a fraction of entry, positive when in profit
    fn gain_fraction(position: &Position, price: Decimal) -> Decimal {
        let diff = match position.side {
            PositionSide::Long => price - position.entry_price,
            PositionSide::Short => position.entry_price - price,
        };
        if position.entry_price > Decimal::ZERO {
            diff / position.entry_price
        } else {
            Decimal::ZERO
        }
    }
}

impl Default for ProfitLock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build(_context: &BotContext) -> anyhow::Result<Arc<dyn Bot>> {
    Ok(Arc::new(ProfitLock::new()))
}

impl Bot for ProfitLock {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn version(&self) -> &str {
        self.core.version()
    }

    fn status(&self) -> BotStatus {
        self.core.status()
    }

    fn as_guardian(&self) -> Option<&dyn PositionGuardian> {
        Some(self)
    }
}

#[async_trait]
impl PositionGuardian for ProfitLock {
    async fn evaluate(&self, position: &Position, tick: &MarketSnapshot) -> GuardianVerdict {
        let price = tick.last_price;
        let gain = Self::gain_fraction(position, price);

        let mut peaks = self.peaks.write().await;
        let peak = peaks
            .entry(position.position_id.clone())
            .or_insert(Decimal::ZERO);
        if gain > *peak {
            *peak = gain;
        }
        let peak = *peak;
        drop(peaks);

        if peak < LOCK_THRESHOLD {
            return GuardianVerdict::default();
        }

        let retained = if peak > Decimal::ZERO { gain / peak } else { Decimal::ONE };
        if retained < Decimal::ONE - GIVE_BACK {
            self.core.note_signal();
            return GuardianVerdict {
                close: Some(format!(
                    "profit lock: gave back {}% of peak gain {}%",
                    ((Decimal::ONE - retained) * Decimal::ONE_HUNDRED).round_dp(1),
                    (peak * Decimal::ONE_HUNDRED).round_dp(1),
                )),
                adjust_stop: None,
            };
        }

        // Still holding most of the gain: pin the stop at breakeven
        GuardianVerdict {
            close: None,
            adjust_stop: Some(position.entry_price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bots::builtin::test_support::snapshot_with_closes;
    use crate::domain::position::PositionStatus;
    use chrono::Utc;

    fn long_position(entry: f64) -> Position {
        Position {
            position_id: "pos-1".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: PositionSide::Long,
            entry_price: Decimal::try_from(entry).unwrap(),
            amount: dec!(1),
            strategy: "grid_weaver".to_string(),
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_small_gain_does_nothing() {
        let bot = ProfitLock::new();
        let position = long_position(50_000.0);
        let tick = snapshot_with_closes("BTC/USDT", &[50_100.0]);

        let verdict = bot.evaluate(&position, &tick).await;
        assert!(verdict.close.is_none());
        assert!(verdict.adjust_stop.is_none());
    }

    #[tokio::test]
    async fn test_locked_gain_moves_stop_to_breakeven() {
        let bot = ProfitLock::new();
        let position = long_position(50_000.0);
        // +2% engages the lock
        let tick = snapshot_with_closes("BTC/USDT", &[51_000.0]);

        let verdict = bot.evaluate(&position, &tick).await;
        assert!(verdict.close.is_none());
        assert_eq!(verdict.adjust_stop, Some(position.entry_price));
    }

    #[tokio::test]
    async fn test_deep_giveback_closes() {
        let bot = ProfitLock::new();
        let position = long_position(50_000.0);

        // Peak at +3%, then fall back to +1% (retained 1/3 < 60%)
        bot.evaluate(&position, &snapshot_with_closes("BTC/USDT", &[51_500.0]))
            .await;
        let verdict = bot
            .evaluate(&position, &snapshot_with_closes("BTC/USDT", &[50_500.0]))
            .await;

        let reason = verdict.close.expect("should close");
        assert!(reason.contains("profit lock"));
    }

    #[tokio::test]
    async fn test_short_side_mirrors() {
        let bot = ProfitLock::new();
        let mut position = long_position(50_000.0);
        position.side = PositionSide::Short;

        // -2% price move is a +2% gain for a short
        let verdict = bot
            .evaluate(&position, &snapshot_with_closes("BTC/USDT", &[49_000.0]))
            .await;
        assert_eq!(verdict.adjust_stop, Some(position.entry_price));
    }
}
