use crate::domain::errors::ExchangeError;
use crate::domain::market::{BookLevel, Ohlcv, OrderBook, Ticker, Timeframe, base_asset};
use crate::domain::order::{OrderAck, OrderAckStatus, OrderRequest, OrderSide};
use crate::domain::ports::ExchangeBackend;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

/// Deterministic but non-trivial simulated exchange. Prices follow an LCG
/// random walk so repeated runs reproduce exactly; tests can script
/// failures and seed balances.
pub struct MockBackend {
    prices: RwLock<HashMap<String, f64>>,
    balances: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<Vec<OrderAck>>,
    iteration: AtomicU64,
    order_seq: AtomicU64,
    fail_next: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), Decimal::from(10_000));
        Self {
            prices: RwLock::new(HashMap::new()),
            balances: RwLock::new(balances),
            orders: RwLock::new(Vec::new()),
            iteration: AtomicU64::new(0),
            order_seq: AtomicU64::new(0),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Makes the next `count` calls fail with a network error
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub async fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances
            .write()
            .await
            .insert(asset.to_string(), amount);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn base_price(symbol: &str) -> f64 {
        if symbol.contains("BTC") {
            96_000.0
        } else if symbol.contains("ETH") {
            3_400.0
        } else if symbol.contains("SOL") {
            150.0
        } else if symbol.contains("AVAX") {
            40.0
        } else {
            100.0
        }
    }

    fn symbol_salt(symbol: &str) -> u64 {
        symbol.bytes().map(|b| b as u64).sum()
    }

    /// LCG step in [-0.5, 0.5)
    fn jitter(seed: u64) -> f64 {
        let seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (((seed / 65_536) % 1_000) as f64 / 1_000.0) - 0.5
    }

    async fn step_price(&self, symbol: &str) -> f64 {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst);
        let mut prices = self.prices.write().await;
        let current = *prices
            .entry(symbol.to_string())
            .or_insert_with(|| Self::base_price(symbol));

        let change_pct = Self::jitter(iteration + Self::symbol_salt(symbol)) * 0.01;
        let next = current * (1.0 + change_pct);
        prices.insert(symbol.to_string(), next);
        next
    }

    fn consume_failure(&self) -> Result<(), ExchangeError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ExchangeError::Network(
                "simulated connection failure".to_string(),
            ));
        }
        Ok(())
    }

    fn decimal(value: f64) -> Decimal {
        Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        self.consume_failure()?;

        let last = self.step_price(symbol).await;
        let base = Self::base_price(symbol);

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: Self::decimal(last),
            bid: Self::decimal(last * 0.9995),
            ask: Self::decimal(last * 1.0005),
            volume_24h: Self::decimal(base * 0.5 + 1_000.0),
            high_24h: Self::decimal(last * 1.02),
            low_24h: Self::decimal(last * 0.98),
            change_24h: Self::decimal((last - base) / base),
        })
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        self.consume_failure()?;

        let mid = self.step_price(symbol).await;
        let level_amount = 25.0 + Self::jitter(Self::symbol_salt(symbol)) * 10.0;

        let mut bids = Vec::with_capacity(depth);
        let mut asks = Vec::with_capacity(depth);
        for i in 0..depth {
            let offset = (i as f64 + 1.0) * 0.0005;
            // Size thins out away from the touch
            let amount = level_amount / (i as f64 + 1.0);
            bids.push(BookLevel {
                price: Self::decimal(mid * (1.0 - offset)),
                amount: Self::decimal(amount),
            });
            asks.push(BookLevel {
                price: Self::decimal(mid * (1.0 + offset)),
                amount: Self::decimal(amount),
            });
        }

        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids,
            asks,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, ExchangeError> {
        self.consume_failure()?;

        let last = self.step_price(symbol).await;
        let now = Utc::now().timestamp();
        let step = timeframe.seconds();
        let salt = Self::symbol_salt(symbol);

        // Walk backwards from the live price so the newest row lines up
        let mut closes = vec![0.0; limit];
        let mut price = last;
        for i in (0..limit).rev() {
            closes[i] = price;
            let drift = Self::jitter(salt + i as u64) * 0.008;
            price /= 1.0 + drift;
        }

        let rows = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let wiggle = close * 0.002;
                Ohlcv {
                    timestamp: now - step * (limit as i64 - 1 - i as i64),
                    open: Self::decimal(close - wiggle * 0.5),
                    high: Self::decimal(close + wiggle),
                    low: Self::decimal(close - wiggle),
                    close: Self::decimal(*close),
                    volume: Self::decimal(50.0 + Self::jitter(salt + i as u64) * 20.0),
                }
            })
            .collect();

        Ok(rows)
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.consume_failure()?;

        let fill_price = match request.price {
            Some(price) => price,
            None => Self::decimal(self.step_price(&request.symbol).await),
        };

        // Settle the fill against balances
        {
            let mut balances = self.balances.write().await;
            let asset = base_asset(&request.symbol).to_string();
            let entry = balances.entry(asset).or_insert(Decimal::ZERO);
            match request.side {
                OrderSide::Buy => *entry += request.amount,
                OrderSide::Sell => *entry -= request.amount,
            }
        }

        let ack = OrderAck {
            order_id: format!("mock-{}", self.order_seq.fetch_add(1, Ordering::SeqCst) + 1),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            fill_price: Some(fill_price),
            status: OrderAckStatus::Filled,
            submitted_at: Utc::now(),
        };

        info!(
            "MockBackend: filled {} {} {} @ {}",
            ack.side, ack.amount, ack.symbol, fill_price
        );

        self.orders.write().await.push(ack.clone());
        Ok(ack)
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.consume_failure()?;
        Ok(self
            .balances
            .read()
            .await
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn fetch_holdings(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.consume_failure()?;
        let balances = self.balances.read().await;
        Ok(balances
            .iter()
            .filter(|(asset, amount)| *asset != "USDT" && **amount != Decimal::ZERO)
            .map(|(asset, amount)| (asset.clone(), *amount))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_ticker_is_plausible() {
        let backend = MockBackend::new();
        let ticker = backend.fetch_ticker("BTC/USDT").await.unwrap();

        assert!(ticker.last > dec!(90000));
        assert!(ticker.last < dec!(102000));
        assert!(ticker.bid < ticker.ask);
        assert!(ticker.volume_24h > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_prices_jitter_but_stay_bounded() {
        let backend = MockBackend::new();
        let first = backend.fetch_ticker("ETH/USDT").await.unwrap().last;

        let mut moved = false;
        for _ in 0..10 {
            let next = backend.fetch_ticker("ETH/USDT").await.unwrap().last;
            if next != first {
                moved = true;
            }
            // A 1% max step can't leave this band in ten ticks
            assert!(next > first * dec!(0.85) && next < first * dec!(1.15));
        }
        assert!(moved, "price walk should not be constant");
    }

    #[tokio::test]
    async fn test_order_book_sides_ordered() {
        let backend = MockBackend::new();
        let book = backend.fetch_order_book("BTC/USDT", 10).await.unwrap();

        assert_eq!(book.bids.len(), 10);
        assert_eq!(book.asks.len(), 10);

        for pair in book.bids.windows(2) {
            assert!(pair[0].price > pair[1].price, "bids must descend");
        }
        for pair in book.asks.windows(2) {
            assert!(pair[0].price < pair[1].price, "asks must ascend");
        }
        assert!(book.best_bid().unwrap() < book.best_ask().unwrap());
    }

    #[tokio::test]
    async fn test_ohlcv_newest_last_and_monotonic() {
        let backend = MockBackend::new();
        let rows = backend
            .fetch_ohlcv("BTC/USDT", Timeframe::H1, 30)
            .await
            .unwrap();

        assert_eq!(rows.len(), 30);
        for pair in rows.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for row in &rows {
            assert!(row.low <= row.close && row.close <= row.high);
        }
    }

    #[tokio::test]
    async fn test_order_settles_balance() {
        let backend = MockBackend::new();
        let request = OrderRequest::market("BTC/USDT", OrderSide::Buy, dec!(0.5));
        let ack = backend.submit_order(&request).await.unwrap();

        assert_eq!(ack.status, OrderAckStatus::Filled);
        assert_eq!(backend.fetch_balance("BTC").await.unwrap(), dec!(0.5));
        assert_eq!(backend.order_count().await, 1);

        let holdings = backend.fetch_holdings().await.unwrap();
        assert_eq!(holdings.get("BTC"), Some(&dec!(0.5)));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MockBackend::new();
        backend.fail_next(2);

        assert!(backend.fetch_ticker("BTC/USDT").await.is_err());
        assert!(backend.fetch_balance("USDT").await.is_err());
        assert!(backend.fetch_ticker("BTC/USDT").await.is_ok());
    }
}
