use crate::domain::errors::ExchangeError;
use crate::domain::market::{BookLevel, Ohlcv, OrderBook, Ticker, Timeframe};
use crate::domain::order::{OrderAck, OrderAckStatus, OrderRequest};
use crate::domain::ports::ExchangeBackend;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RestBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Live REST exchange backend. Transport-level retries are handled by the
/// middleware stack; safety policy (rate limits, circuit) lives in the
/// adapter above this layer.
pub struct RestBackend {
    client: ClientWithMiddleware,
    config: RestBackendConfig,
}

impl RestBackend {
    pub fn new(config: RestBackendConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        info!("RestBackend: targeting {}", config.base_url);
        Self { client, config }
    }

    fn map_transport_error(e: reqwest_middleware::Error) -> ExchangeError {
        match e {
            reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => {
                ExchangeError::Timeout(Duration::from_secs(30))
            }
            other => ExchangeError::Network(other.to_string()),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        // The middleware request builder exposes no .query(); build the
        // URL by hand
        let url = build_url_with_query(
            &format!("{}{}", self.config.base_url, path),
            query,
        );
        debug!("RestBackend: GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(ExchangeError::Unavailable(format!(
                "exchange returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Validation(format!(
                "exchange rejected request ({}): {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))
    }

    /// HMAC-SHA256 over the canonical payload, hex encoded
    fn sign(&self, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

// ===== Wire DTOs =====

#[derive(Debug, Deserialize)]
struct TickerDto {
    symbol: String,
    last: Decimal,
    bid: Decimal,
    ask: Decimal,
    volume_24h: Decimal,
    high_24h: Decimal,
    low_24h: Decimal,
    change_24h: Decimal,
}

#[derive(Debug, Deserialize)]
struct BookLevelDto(Decimal, Decimal);

#[derive(Debug, Deserialize)]
struct OrderBookDto {
    symbol: String,
    bids: Vec<BookLevelDto>,
    asks: Vec<BookLevelDto>,
}

#[derive(Debug, Deserialize)]
struct CandleDto {
    t: i64,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderAckDto {
    order_id: String,
    client_order_id: Option<String>,
    status: String,
    fill_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct BalanceDto {
    available: Decimal,
}

#[derive(Debug, Deserialize)]
struct HoldingDto {
    asset: String,
    amount: Decimal,
}

/// Builds `base?k=v&...` with conservative percent-encoding
fn build_url_with_query(base_url: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn percent_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

fn level(dto: &BookLevelDto) -> BookLevel {
    BookLevel {
        price: dto.0,
        amount: dto.1,
    }
}

#[async_trait]
impl ExchangeBackend for RestBackend {
    fn name(&self) -> &str {
        "rest"
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let dto: TickerDto = self
            .get_json("/v1/market/ticker", &[("symbol", symbol.to_string())])
            .await?;

        Ok(Ticker {
            symbol: dto.symbol,
            last: dto.last,
            bid: dto.bid,
            ask: dto.ask,
            volume_24h: dto.volume_24h,
            high_24h: dto.high_24h,
            low_24h: dto.low_24h,
            change_24h: dto.change_24h,
        })
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        let dto: OrderBookDto = self
            .get_json(
                "/v1/market/book",
                &[
                    ("symbol", symbol.to_string()),
                    ("depth", depth.to_string()),
                ],
            )
            .await?;

        Ok(OrderBook {
            symbol: dto.symbol,
            bids: dto.bids.iter().map(level).collect(),
            asks: dto.asks.iter().map(level).collect(),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, ExchangeError> {
        let rows: Vec<CandleDto> = self
            .get_json(
                "/v1/market/candles",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|dto| Ohlcv {
                timestamp: dto.t,
                open: dto.o,
                high: dto.h,
                low: dto.l,
                close: dto.c,
                volume: dto.v,
            })
            .collect())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let nonce = Utc::now().timestamp_millis();
        let body = serde_json::json!({
            "symbol": request.symbol,
            "side": request.side.to_string(),
            "type": request.order_type.to_string(),
            "amount": request.amount,
            "price": request.price,
            "client_order_id": request.client_order_id,
            "nonce": nonce,
        });

        let payload = format!("{}{}", nonce, body);
        let signature = self.sign(&payload);

        let url = format!("{}/v1/orders", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .header("X-SIGNATURE", signature)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let dto: OrderAckDto = Self::decode(response).await?;

        let status = match dto.status.as_str() {
            "FILLED" => OrderAckStatus::Filled,
            "ACCEPTED" | "NEW" => OrderAckStatus::Accepted,
            "REJECTED" => OrderAckStatus::Rejected,
            other => {
                return Err(ExchangeError::Decode(format!(
                    "unknown order status: {}",
                    other
                )));
            }
        };

        Ok(OrderAck {
            order_id: dto.order_id,
            client_order_id: dto.client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            fill_price: dto.fill_price,
            status,
            submitted_at: Utc::now(),
        })
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let dto: BalanceDto = self
            .get_json("/v1/account/balance", &[("asset", asset.to_string())])
            .await?;
        if dto.available < Decimal::ZERO {
            return Err(ExchangeError::Decode(format!(
                "negative balance reported for {}",
                asset
            )));
        }
        Ok(dto.available)
    }

    async fn fetch_holdings(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let rows: Vec<HoldingDto> = self.get_json("/v1/account/holdings", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|dto| (dto.asset, dto.amount))
            .collect())
    }
}
