pub mod mock;
pub mod rest;

pub use mock::MockBackend;
pub use rest::{RestBackend, RestBackendConfig};

use crate::application::safety::{Denial, SafetyEnvelope, StateChange};
use crate::domain::errors::ExchangeError;
use crate::domain::events::EngineEvent;
use crate::domain::market::{Ohlcv, OrderBook, Ticker, Timeframe, validate_symbol};
use crate::domain::order::{OrderAck, OrderRequest};
use crate::domain::ports::ExchangeBackend;
use crate::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExchangeAdapterConfig {
    pub call_timeout: Duration,
    /// Longest rate-limit wait the adapter will absorb before surfacing
    pub max_rate_limit_backoff: Duration,
}

impl Default for ExchangeAdapterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_rate_limit_backoff: Duration::from_secs(5),
        }
    }
}

/// The sole outbound channel to the exchange. Wraps exactly one backend
/// with the safety envelope, per-call timeouts, bounded rate-limit backoff
/// and an idempotency cache for order submission. No other component may
/// talk to the exchange directly.
pub struct ExchangeAdapter {
    backend: Arc<dyn ExchangeBackend>,
    envelope: Arc<SafetyEnvelope>,
    events: EventBus,
    config: ExchangeAdapterConfig,
    ack_cache: Mutex<HashMap<String, OrderAck>>,
}

impl ExchangeAdapter {
    pub fn new(
        backend: Arc<dyn ExchangeBackend>,
        envelope: Arc<SafetyEnvelope>,
        events: EventBus,
        config: ExchangeAdapterConfig,
    ) -> Self {
        info!(
            "ExchangeAdapter: wrapping backend '{}' (timeout {:?})",
            backend.name(),
            config.call_timeout
        );
        Self {
            backend,
            envelope,
            events,
            config,
            ack_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        self.validate(symbol)?;
        self.guarded("get_ticker", || self.backend.fetch_ticker(symbol))
            .await
    }

    pub async fn get_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        self.validate(symbol)?;
        self.guarded("get_order_book", || {
            self.backend.fetch_order_book(symbol, depth)
        })
        .await
    }

    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, ExchangeError> {
        self.validate(symbol)?;
        self.guarded("get_ohlcv", || {
            self.backend.fetch_ohlcv(symbol, timeframe, limit)
        })
        .await
    }

    /// Submits an order. When `client_order_id` is set, resubmission with
    /// the same id returns the original ack without touching the exchange.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.validate(&request.symbol)?;
        if request.amount <= Decimal::ZERO {
            return Err(ExchangeError::Validation(format!(
                "order amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(client_id) = &request.client_order_id
            && let Some(ack) = self.ack_cache.lock().await.get(client_id)
        {
            info!(
                "ExchangeAdapter: duplicate submission for client_order_id {}, returning original ack",
                client_id
            );
            return Ok(ack.clone());
        }

        let ack = self
            .guarded("place_order", || self.backend.submit_order(request))
            .await?;

        if let Some(client_id) = &request.client_order_id {
            self.ack_cache
                .lock()
                .await
                .insert(client_id.clone(), ack.clone());
        }

        Ok(ack)
    }

    pub async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.guarded("get_balance", || self.backend.fetch_balance(asset))
            .await
    }

    /// Authoritative holdings snapshot for ledger reconciliation
    pub async fn holdings_snapshot(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.guarded("holdings_snapshot", || self.backend.fetch_holdings())
            .await
    }

    fn validate(&self, symbol: &str) -> Result<(), ExchangeError> {
        validate_symbol(symbol).map_err(|_| ExchangeError::InvalidSymbol(symbol.to_string()))
    }

    /// Envelope consult, bounded backoff, per-call timeout and circuit
    /// bookkeeping around one backend call.
    async fn guarded<T, F, Fut>(&self, op: &str, call: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        self.admit_with_backoff(op).await?;

        match tokio::time::timeout(self.config.call_timeout, call()).await {
            Err(_) => {
                let change = self
                    .envelope
                    .record_failure(&format!("{} timed out", op))
                    .await;
                self.publish_change(change);
                Err(ExchangeError::Timeout(self.config.call_timeout))
            }
            Ok(Err(e)) => {
                if e.counts_against_circuit() {
                    let change = self.envelope.record_failure(&e.to_string()).await;
                    self.publish_change(change);
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                let change = self.envelope.record_success().await;
                self.publish_change(change);
                Ok(value)
            }
        }
    }

    async fn admit_with_backoff(&self, op: &str) -> Result<(), ExchangeError> {
        match self.envelope.admit().await {
            Ok(change) => {
                self.publish_change(change);
                Ok(())
            }
            Err(Denial::CircuitOpen { retry_in }) => Err(ExchangeError::CircuitOpen { retry_in }),
            Err(Denial::RateLimited { wait }) => {
                if wait > self.config.max_rate_limit_backoff {
                    return Err(ExchangeError::RateLimited { wait });
                }

                warn!(
                    "ExchangeAdapter: {} rate limited, backing off {:?} before one retry",
                    op, wait
                );
                self.events.publish(EngineEvent::RateLimitHit {
                    wait_s: wait.as_secs_f64(),
                });
                tokio::time::sleep(wait).await;

                match self.envelope.admit().await {
                    Ok(change) => {
                        self.publish_change(change);
                        Ok(())
                    }
                    Err(Denial::CircuitOpen { retry_in }) => {
                        Err(ExchangeError::CircuitOpen { retry_in })
                    }
                    Err(Denial::RateLimited { wait }) => Err(ExchangeError::RateLimited { wait }),
                }
            }
        }
    }

    fn publish_change(&self, change: Option<StateChange>) {
        if let Some(change) = change {
            self.events.publish(EngineEvent::CircuitStateChanged {
                from: change.from.to_string(),
                to: change.to.to_string(),
                reason: change.reason,
            });
        }
    }
}
