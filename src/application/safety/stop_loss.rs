use crate::domain::market::Ohlcv;
use crate::domain::position::{Position, PositionSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct StopLossConfig {
    /// Base stop distance in percent
    pub base_pct: Decimal,
    pub atr_multiplier: Decimal,
    pub min_pct: Decimal,
    pub max_pct: Decimal,
    pub atr_period: usize,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            base_pct: Decimal::TWO,
            atr_multiplier: Decimal::new(15, 1),
            min_pct: Decimal::new(5, 1),
            max_pct: Decimal::new(5, 0),
            atr_period: 14,
        }
    }
}

/// Mean of the true range over the trailing `period` candles. Needs
/// `period + 1` rows for the first previous close; returns None otherwise.
pub fn average_true_range(rows: &[Ohlcv], period: usize) -> Option<Decimal> {
    if period == 0 || rows.len() < period + 1 {
        return None;
    }

    let window = &rows[rows.len() - period - 1..];
    let mut sum = Decimal::ZERO;
    for pair in window.windows(2) {
        let prev_close = pair[0].close;
        let row = &pair[1];
        let tr = (row.high - row.low)
            .max((row.high - prev_close).abs())
            .max((row.low - prev_close).abs());
        sum += tr;
    }

    Some(sum / Decimal::from(period))
}

/// A tracked stop for one open position
#[derive(Debug, Clone, Serialize)]
pub struct StopLevel {
    pub position_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    /// Distance in percent at last adjustment
    pub distance_pct: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Instruction to close a position whose stop was crossed. The envelope
/// never executes; the ledger and adapter do.
#[derive(Debug, Clone)]
pub struct CloseDirective {
    pub position_id: String,
    pub symbol: String,
    pub stop_price: Decimal,
    pub last_price: Decimal,
}

/// ATR-derived trailing stop engine. Stops only ever move toward profit.
pub struct StopEngine {
    config: StopLossConfig,
    stops: RwLock<HashMap<String, StopLevel>>,
}

impl StopEngine {
    pub fn new(config: StopLossConfig) -> Self {
        Self {
            config,
            stops: RwLock::new(HashMap::new()),
        }
    }

    /// clamp(base + multiplier * atr/price, min, max), in percent
    fn distance_pct(&self, atr: Decimal, price: Decimal) -> Decimal {
        let volatility_pct = if price > Decimal::ZERO {
            self.config.atr_multiplier * (atr / price) * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        (self.config.base_pct + volatility_pct)
            .max(self.config.min_pct)
            .min(self.config.max_pct)
    }

    fn protective_price(side: PositionSide, reference: Decimal, distance_pct: Decimal) -> Decimal {
        let fraction = distance_pct / Decimal::ONE_HUNDRED;
        match side {
            PositionSide::Long => reference * (Decimal::ONE - fraction),
            PositionSide::Short => reference * (Decimal::ONE + fraction),
        }
    }

    /// Begins tracking a stop for a freshly opened position
    pub async fn arm(&self, position: &Position, candles: &[Ohlcv]) -> StopLevel {
        let atr = average_true_range(candles, self.config.atr_period).unwrap_or(Decimal::ZERO);
        let distance = self.distance_pct(atr, position.entry_price);
        let stop_price = Self::protective_price(position.side, position.entry_price, distance);

        let level = StopLevel {
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            stop_price,
            distance_pct: distance,
            updated_at: Utc::now(),
        };

        info!(
            "StopEngine: armed {} {} stop at {} ({}% from entry {})",
            level.symbol, level.side, level.stop_price, level.distance_pct, level.entry_price
        );

        self.stops
            .write()
            .await
            .insert(position.position_id.clone(), level.clone());
        level
    }

    /// Price tick for a tracked position. Ratchets the stop toward profit
    /// and returns a close directive once the stop is crossed.
    pub async fn on_tick(
        &self,
        position_id: &str,
        last_price: Decimal,
        candles: &[Ohlcv],
    ) -> Option<CloseDirective> {
        let mut stops = self.stops.write().await;
        let level = stops.get_mut(position_id)?;

        let crossed = match level.side {
            PositionSide::Long => last_price <= level.stop_price,
            PositionSide::Short => last_price >= level.stop_price,
        };

        if crossed {
            let directive = CloseDirective {
                position_id: level.position_id.clone(),
                symbol: level.symbol.clone(),
                stop_price: level.stop_price,
                last_price,
            };
            info!(
                "StopEngine: stop crossed for {} at {} (stop {})",
                directive.symbol, last_price, directive.stop_price
            );
            stops.remove(position_id);
            return Some(directive);
        }

        // Trail: recompute from the current price and keep the better stop
        let atr = average_true_range(candles, self.config.atr_period).unwrap_or(Decimal::ZERO);
        let distance = self.distance_pct(atr, last_price);
        let candidate = Self::protective_price(level.side, last_price, distance);

        let improved = match level.side {
            PositionSide::Long => candidate > level.stop_price,
            PositionSide::Short => candidate < level.stop_price,
        };
        if improved {
            debug!(
                "StopEngine: trailing {} stop {} -> {}",
                level.symbol, level.stop_price, candidate
            );
            level.stop_price = candidate;
            level.distance_pct = distance;
            level.updated_at = Utc::now();
        }

        None
    }

    pub async fn disarm(&self, position_id: &str) -> Option<StopLevel> {
        self.stops.write().await.remove(position_id)
    }

    pub async fn stop_for(&self, position_id: &str) -> Option<StopLevel> {
        self.stops.read().await.get(position_id).cloned()
    }

    pub async fn armed(&self) -> Vec<StopLevel> {
        self.stops.read().await.values().cloned().collect()
    }
}
