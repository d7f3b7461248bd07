use crate::domain::market::{MarketSnapshot, OrderBook};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RugShieldConfig {
    pub min_liquidity_usd: f64,
    pub min_volume_24h_usd: f64,
    pub max_spread_pct: f64,
    pub blacklist: Vec<String>,
}

impl Default for RugShieldConfig {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 1_000_000.0,
            min_volume_24h_usd: 100_000.0,
            max_spread_pct: 1.0,
            blacklist: Vec::new(),
        }
    }
}

/// Score band derived from the 0-100 risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=24 => RiskBand::Low,
            25..=49 => RiskBand::Medium,
            50..=74 => RiskBand::High,
            _ => RiskBand::Critical,
        }
    }
}

/// Verdict for one asset. `safe` means score < 50.
#[derive(Debug, Clone, Serialize)]
pub struct AssetAssessment {
    pub symbol: String,
    pub score: u8,
    pub band: RiskBand,
    pub safe: bool,
    pub reasons: Vec<String>,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub spread_pct: f64,
}

/// Pre-trade asset filter: blocks illiquid, thin or blacklisted symbols
/// before any order reaches the exchange.
pub struct RugShield {
    config: RugShieldConfig,
    blacklist: RwLock<HashSet<String>>,
    assets_checked: AtomicU64,
    assets_blocked: AtomicU64,
}

impl RugShield {
    pub fn new(config: RugShieldConfig) -> Self {
        let blacklist = config.blacklist.iter().cloned().collect();
        Self {
            config,
            blacklist: RwLock::new(blacklist),
            assets_checked: AtomicU64::new(0),
            assets_blocked: AtomicU64::new(0),
        }
    }

    /// Full assessment from a snapshot plus order book depth
    pub async fn assess(&self, snapshot: &MarketSnapshot, book: &OrderBook) -> AssetAssessment {
        let bid_depth = OrderBook::side_depth(&book.bids);
        let ask_depth = OrderBook::side_depth(&book.asks);
        let depth_usd = ((bid_depth + ask_depth) / Decimal::TWO) * snapshot.last_price;

        self.assess_inner(
            &snapshot.symbol,
            depth_usd.to_f64().unwrap_or(0.0),
            (snapshot.volume_24h * snapshot.last_price)
                .to_f64()
                .unwrap_or(0.0),
            snapshot.spread_pct.to_f64().unwrap_or(f64::MAX),
        )
        .await
    }

    /// Snapshot-only assessment for callers without an order book; depth is
    /// approximated from quoted volume.
    pub async fn assess_snapshot(&self, snapshot: &MarketSnapshot) -> AssetAssessment {
        let volume_usd = (snapshot.volume_24h * snapshot.last_price)
            .to_f64()
            .unwrap_or(0.0);
        self.assess_inner(
            &snapshot.symbol,
            volume_usd,
            volume_usd,
            snapshot.spread_pct.to_f64().unwrap_or(f64::MAX),
        )
        .await
    }

    async fn assess_inner(
        &self,
        symbol: &str,
        liquidity_usd: f64,
        volume_24h_usd: f64,
        spread_pct: f64,
    ) -> AssetAssessment {
        self.assets_checked.fetch_add(1, Ordering::Relaxed);

        let mut score: u32 = 0;
        let mut reasons = Vec::new();

        if self.is_blacklisted(symbol).await {
            score += 100;
            reasons.push(format!("{} is blacklisted", symbol));
        }
        if liquidity_usd < self.config.min_liquidity_usd {
            score += 40;
            reasons.push(format!(
                "liquidity ${:.0} below minimum ${:.0}",
                liquidity_usd, self.config.min_liquidity_usd
            ));
        }
        if volume_24h_usd < self.config.min_volume_24h_usd {
            score += 30;
            reasons.push(format!(
                "24h volume ${:.0} below minimum ${:.0}",
                volume_24h_usd, self.config.min_volume_24h_usd
            ));
        }
        if spread_pct > self.config.max_spread_pct {
            score += 20;
            reasons.push(format!(
                "spread {:.2}% above maximum {:.2}%",
                spread_pct, self.config.max_spread_pct
            ));
        }

        let score = score.min(100) as u8;
        let safe = score < 50;

        if !safe {
            self.assets_blocked.fetch_add(1, Ordering::Relaxed);
            warn!(
                "RugShield: blocking {} (score {}, reasons: {:?})",
                symbol, score, reasons
            );
        }

        AssetAssessment {
            symbol: symbol.to_string(),
            score,
            band: RiskBand::from_score(score),
            safe,
            reasons,
            liquidity_usd,
            volume_24h_usd,
            spread_pct,
        }
    }

    pub async fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.read().await.contains(symbol)
    }

    pub async fn blacklist_add(&self, symbol: &str) {
        info!("RugShield: blacklisting {}", symbol);
        self.blacklist.write().await.insert(symbol.to_string());
    }

    pub async fn blacklist_remove(&self, symbol: &str) -> bool {
        self.blacklist.write().await.remove(symbol)
    }

    pub fn checked_count(&self) -> u64 {
        self.assets_checked.load(Ordering::Relaxed)
    }

    pub fn blocked_count(&self) -> u64 {
        self.assets_blocked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{BookLevel, Ticker};
    use rust_decimal_macros::dec;

    fn snapshot(volume_24h: Decimal, bid: Decimal, ask: Decimal) -> MarketSnapshot {
        let ticker = Ticker {
            symbol: "BTC/USDT".to_string(),
            last: dec!(50000),
            bid,
            ask,
            volume_24h,
            high_24h: dec!(51000),
            low_24h: dec!(49000),
            change_24h: dec!(0.0),
        };
        MarketSnapshot::new(&ticker, vec![]).unwrap()
    }

    fn deep_book() -> OrderBook {
        OrderBook {
            symbol: "BTC/USDT".to_string(),
            bids: vec![
                BookLevel {
                    price: dec!(49990),
                    amount: dec!(40),
                },
                BookLevel {
                    price: dec!(49980),
                    amount: dec!(40),
                },
            ],
            asks: vec![
                BookLevel {
                    price: dec!(50010),
                    amount: dec!(40),
                },
                BookLevel {
                    price: dec!(50020),
                    amount: dec!(40),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_liquid_asset_scores_low() {
        let shield = RugShield::new(RugShieldConfig::default());
        let snap = snapshot(dec!(100), dec!(49990), dec!(50010));

        let assessment = shield.assess(&snap, &deep_book()).await;
        assert!(assessment.safe);
        assert_eq!(assessment.band, RiskBand::Low);
        assert!(assessment.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_thin_book_blocks() {
        let shield = RugShield::new(RugShieldConfig::default());
        let snap = snapshot(dec!(0.001), dec!(49990), dec!(50010));
        let book = OrderBook {
            symbol: "BTC/USDT".to_string(),
            bids: vec![BookLevel {
                price: dec!(49990),
                amount: dec!(0.001),
            }],
            asks: vec![BookLevel {
                price: dec!(50010),
                amount: dec!(0.001),
            }],
        };

        let assessment = shield.assess(&snap, &book).await;
        assert!(!assessment.safe);
        // Liquidity (40) + volume (30) trip together
        assert_eq!(assessment.score, 70);
        assert_eq!(assessment.band, RiskBand::High);
        assert_eq!(assessment.reasons.len(), 2);
    }

    #[tokio::test]
    async fn test_wide_spread_alone_is_medium() {
        let shield = RugShield::new(RugShieldConfig::default());
        // ~2% spread
        let snap = snapshot(dec!(100), dec!(49500), dec!(50500));

        let assessment = shield.assess(&snap, &deep_book()).await;
        assert!(assessment.safe);
        assert_eq!(assessment.score, 20);
        assert_eq!(assessment.reasons.len(), 1);
    }

    #[tokio::test]
    async fn test_blacklist_is_critical() {
        let shield = RugShield::new(RugShieldConfig::default());
        shield.blacklist_add("BTC/USDT").await;

        let snap = snapshot(dec!(100), dec!(49990), dec!(50010));
        let assessment = shield.assess(&snap, &deep_book()).await;

        assert!(!assessment.safe);
        assert_eq!(assessment.band, RiskBand::Critical);

        assert!(shield.blacklist_remove("BTC/USDT").await);
        let assessment = shield.assess(&snap, &deep_book()).await;
        assert!(assessment.safe);
    }

    #[tokio::test]
    async fn test_metrics_counters() {
        let shield = RugShield::new(RugShieldConfig::default());
        let snap = snapshot(dec!(0.001), dec!(49990), dec!(50010));

        shield.assess_snapshot(&snap).await;
        shield.assess_snapshot(&snap).await;

        assert_eq!(shield.checked_count(), 2);
        assert_eq!(shield.blocked_count(), 2);
    }
}
