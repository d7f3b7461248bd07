pub mod circuit_breaker;
pub mod rate_limiter;
pub mod rug_shield;
pub mod stop_loss;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, StateChange,
};
pub use rate_limiter::{Admission, RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use rug_shield::{AssetAssessment, RiskBand, RugShield, RugShieldConfig};
pub use stop_loss::{CloseDirective, StopEngine, StopLevel, StopLossConfig, average_true_range};

use serde::Serialize;
use std::time::Duration;

/// Why the envelope refused an outbound call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denial {
    RateLimited { wait: Duration },
    CircuitOpen { retry_in: Duration },
}

/// Process-wide safety snapshot, read by status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SafetyState {
    pub rate_limiter: RateLimiterSnapshot,
    pub circuit: CircuitSnapshot,
    pub rug_checks: u64,
    pub rug_blocks: u64,
    pub armed_stops: usize,
}

/// Composition of the four safety sub-policies. Every outbound exchange
/// call consults `admit` first; the adapter reports outcomes back through
/// `record_success` / `record_failure`.
pub struct SafetyEnvelope {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    shield: RugShield,
    stops: StopEngine,
}

impl SafetyEnvelope {
    pub fn new(
        limiter_config: RateLimiterConfig,
        breaker_config: CircuitBreakerConfig,
        shield_config: RugShieldConfig,
        stop_config: StopLossConfig,
    ) -> Self {
        Self::from_parts(
            RateLimiter::new(limiter_config),
            CircuitBreaker::new("exchange", breaker_config),
            RugShield::new(shield_config),
            StopEngine::new(stop_config),
        )
    }

    /// Assembles an envelope from pre-built parts, e.g. a limiter with
    /// shortened windows in tests
    pub fn from_parts(
        limiter: RateLimiter,
        breaker: CircuitBreaker,
        shield: RugShield,
        stops: StopEngine,
    ) -> Self {
        Self {
            limiter,
            breaker,
            shield,
            stops,
        }
    }

    /// Admission check before I/O. The circuit is consulted first: a
    /// rejected call must not consume a rate-limit slot.
    pub async fn admit(&self) -> Result<Option<StateChange>, Denial> {
        let change = self
            .breaker
            .admit()
            .await
            .map_err(|retry_in| Denial::CircuitOpen { retry_in })?;

        let admission = self.limiter.try_acquire().await;
        if !admission.allowed {
            return Err(Denial::RateLimited {
                wait: admission.wait,
            });
        }

        Ok(change)
    }

    pub async fn record_success(&self) -> Option<StateChange> {
        self.breaker.record_success().await
    }

    pub async fn record_failure(&self, reason: &str) -> Option<StateChange> {
        self.breaker.record_failure(reason).await
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    pub fn shield(&self) -> &RugShield {
        &self.shield
    }

    pub fn stops(&self) -> &StopEngine {
        &self.stops
    }

    pub async fn state(&self) -> SafetyState {
        SafetyState {
            rate_limiter: self.limiter.snapshot().await,
            circuit: self.breaker.snapshot().await,
            rug_checks: self.shield.checked_count(),
            rug_blocks: self.shield.blocked_count(),
            armed_stops: self.stops.armed().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(max_per_minute: u32, failure_threshold: u32) -> SafetyEnvelope {
        SafetyEnvelope::new(
            RateLimiterConfig {
                max_per_minute,
                max_per_second: max_per_minute,
            },
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
            RugShieldConfig::default(),
            StopLossConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_admit_passes_when_healthy() {
        let env = envelope(10, 5);
        assert!(env.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_denial() {
        let env = envelope(2, 5);
        assert!(env.admit().await.is_ok());
        assert!(env.admit().await.is_ok());

        match env.admit().await {
            Err(Denial::RateLimited { wait }) => assert!(wait > Duration::ZERO),
            other => panic!("expected rate limit denial, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_open_circuit_denies_before_rate_limit() {
        let env = envelope(1, 1);
        env.record_failure("boom").await;

        // Circuit rejection must not consume the single rate-limit slot
        assert!(matches!(
            env.admit().await,
            Err(Denial::CircuitOpen { .. })
        ));
        let state = env.state().await;
        assert_eq!(state.rate_limiter.requests_in_minute, 0);
    }

    #[tokio::test]
    async fn test_state_snapshot() {
        let env = envelope(10, 5);
        env.admit().await.unwrap();
        env.record_failure("x").await;

        let state = env.state().await;
        assert_eq!(state.rate_limiter.requests_in_minute, 1);
        assert_eq!(state.circuit.consecutive_failures, 1);
        assert_eq!(state.circuit.state, CircuitState::Closed);
        assert_eq!(state.armed_stops, 0);
    }
}
