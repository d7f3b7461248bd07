use crate::domain::errors::SnapshotError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Maximum OHLCV rows retained on a snapshot. Older rows are dropped.
pub const MAX_OHLCV_ROWS: usize = 500;

/// Validates the canonical `BASE/QUOTE` symbol form: each side 2-10
/// uppercase alphanumerics.
pub fn validate_symbol(symbol: &str) -> Result<(), SnapshotError> {
    let invalid = || SnapshotError::InvalidSymbol(symbol.to_string());

    let Some((base, quote)) = symbol.split_once('/') else {
        return Err(invalid());
    };

    for part in [base, quote] {
        if part.len() < 2 || part.len() > 10 {
            return Err(invalid());
        }
        if !part
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(invalid());
        }
    }

    // A second slash would have landed in `quote` and failed the char check,
    // except for a trailing one; reject explicitly.
    if quote.contains('/') {
        return Err(invalid());
    }

    Ok(())
}

/// Returns the base asset of a canonical pair, e.g. "BTC" for "BTC/USDT".
pub fn base_asset(symbol: &str) -> &str {
    symbol.split_once('/').map(|(b, _)| b).unwrap_or(symbol)
}

/// Candle timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            _ => anyhow::bail!("Invalid timeframe: {}", s),
        }
    }
}

/// One OHLCV candle row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 24h ticker for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    /// Signed ratio, e.g. -0.034 for a 3.4% drop
    pub change_24h: Decimal,
}

/// One price level of an order book side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Order book with bids descending and asks ascending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Total base amount across one side
    pub fn side_depth(levels: &[BookLevel]) -> Decimal {
        levels.iter().map(|l| l.amount).sum()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// Immutable per-(symbol, cycle) view of the market. Built once via
/// [`MarketSnapshot::new`], then shared read-only across all bots.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    /// (ask - bid) / bid, in percent
    pub spread_pct: Decimal,
    pub volume_24h: Decimal,
    pub change_24h: Decimal,
    /// Newest row last
    pub ohlcv: Vec<Ohlcv>,
    pub observed_at: DateTime<Utc>,
    pub fetched_at: Instant,
}

impl MarketSnapshot {
    pub fn new(ticker: &Ticker, mut ohlcv: Vec<Ohlcv>) -> Result<Self, SnapshotError> {
        validate_symbol(&ticker.symbol)?;

        if ticker.last <= Decimal::ZERO {
            return Err(SnapshotError::NonPositivePrice {
                symbol: ticker.symbol.clone(),
            });
        }
        if ticker.bid > ticker.ask && ticker.ask > Decimal::ZERO {
            return Err(SnapshotError::CrossedBook {
                symbol: ticker.symbol.clone(),
                bid: ticker.bid,
                ask: ticker.ask,
            });
        }
        if ticker.volume_24h < Decimal::ZERO {
            return Err(SnapshotError::NegativeVolume {
                symbol: ticker.symbol.clone(),
            });
        }
        for (i, pair) in ohlcv.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(SnapshotError::UnorderedCandles {
                    symbol: ticker.symbol.clone(),
                    index: i + 1,
                });
            }
        }

        if ohlcv.len() > MAX_OHLCV_ROWS {
            ohlcv.drain(..ohlcv.len() - MAX_OHLCV_ROWS);
        }

        let spread_pct = if ticker.bid > Decimal::ZERO {
            (ticker.ask - ticker.bid) / ticker.bid * Decimal::ONE_HUNDRED
        } else {
            Decimal::ONE_HUNDRED
        };

        Ok(Self {
            symbol: ticker.symbol.clone(),
            last_price: ticker.last,
            bid: ticker.bid,
            ask: ticker.ask,
            spread_pct,
            volume_24h: ticker.volume_24h,
            change_24h: ticker.change_24h,
            ohlcv,
            observed_at: Utc::now(),
            fetched_at: Instant::now(),
        })
    }

    /// Close prices as f64, oldest first, for indicator feeds
    pub fn closes_f64(&self) -> Vec<f64> {
        use rust_decimal::prelude::ToPrimitive;
        self.ohlcv
            .iter()
            .filter_map(|row| row.close.to_f64())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last: dec!(50000),
            bid: dec!(49990),
            ask: dec!(50010),
            volume_24h: dec!(100),
            high_24h: dec!(51000),
            low_24h: dec!(49000),
            change_24h: dec!(0.01),
        }
    }

    fn candle(ts: i64, close: Decimal) -> Ohlcv {
        Ohlcv {
            timestamp: ts,
            open: close,
            high: close + dec!(10),
            low: close - dec!(10),
            close,
            volume: dec!(5),
        }
    }

    #[test]
    fn test_symbol_validation() {
        assert!(validate_symbol("BTC/USDT").is_ok());
        assert!(validate_symbol("SOL/USDT").is_ok());
        assert!(validate_symbol("1INCH/USDT").is_ok());

        assert!(validate_symbol("btc/usdt").is_err());
        assert!(validate_symbol("BTCUSDT").is_err());
        assert!(validate_symbol("B/USDT").is_err());
        assert!(validate_symbol("BTC/VERYLONGQUOTE").is_err());
        assert!(validate_symbol("BTC/USD/T").is_err());
        assert!(validate_symbol("BTC-USD").is_err());
        assert!(validate_symbol("").is_err());
    }

    #[test]
    fn test_base_asset() {
        assert_eq!(base_asset("BTC/USDT"), "BTC");
        assert_eq!(base_asset("ETH/USDT"), "ETH");
    }

    #[test]
    fn test_snapshot_derives_spread() {
        let snap = MarketSnapshot::new(&ticker("BTC/USDT"), vec![]).unwrap();
        assert!(snap.spread_pct > Decimal::ZERO);
        assert!(snap.spread_pct < dec!(0.1));
    }

    #[test]
    fn test_snapshot_rejects_crossed_book() {
        let mut t = ticker("BTC/USDT");
        t.bid = dec!(50020);
        t.ask = dec!(50010);
        assert!(matches!(
            MarketSnapshot::new(&t, vec![]),
            Err(SnapshotError::CrossedBook { .. })
        ));
    }

    #[test]
    fn test_snapshot_rejects_unordered_candles() {
        let rows = vec![candle(200, dec!(50000)), candle(100, dec!(50100))];
        assert!(matches!(
            MarketSnapshot::new(&ticker("BTC/USDT"), rows),
            Err(SnapshotError::UnorderedCandles { index: 1, .. })
        ));
    }

    #[test]
    fn test_snapshot_bounds_candle_history() {
        let rows: Vec<Ohlcv> = (0..(MAX_OHLCV_ROWS as i64 + 50))
            .map(|i| candle(i * 60, dec!(50000)))
            .collect();
        let snap = MarketSnapshot::new(&ticker("BTC/USDT"), rows).unwrap();
        assert_eq!(snap.ohlcv.len(), MAX_OHLCV_ROWS);
        // Newest rows survive
        assert_eq!(
            snap.ohlcv.last().unwrap().timestamp,
            (MAX_OHLCV_ROWS as i64 + 49) * 60
        );
    }

    #[test]
    fn test_timeframe_roundtrip() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2w".parse::<Timeframe>().is_err());
    }
}
