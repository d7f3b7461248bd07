use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - admit one probe
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Emitted whenever a transition happens, for the event stream
#[derive(Debug, Clone)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub seconds_since_opened: Option<f64>,
    pub seconds_until_probe: Option<f64>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    probe_in_flight: bool,
    opened_at: Option<Instant>,
}

/// Three-state gate protecting the exchange from cascading failures.
/// `record_success` / `record_failure` are the only mutators besides the
/// Open -> HalfOpen timer transition inside `admit`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                probe_in_flight: false,
                opened_at: None,
            }),
        }
    }

    /// Asks whether a call may go out. Returns the retry delay when the
    /// circuit rejects. Performs no I/O itself.
    pub async fn admit(&self) -> Result<Option<StateChange>, Duration> {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.recovery_timeout);

                if elapsed >= self.config.recovery_timeout {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (recovery timeout elapsed)",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                    inner.probe_in_flight = true;
                    Ok(Some(StateChange {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                        reason: "recovery timeout elapsed".to_string(),
                    }))
                } else {
                    Err(self.config.recovery_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    // One probe at a time; everyone else waits out the timer
                    Err(self.config.recovery_timeout)
                } else {
                    inner.probe_in_flight = true;
                    Ok(None)
                }
            }
        }
    }

    pub async fn record_success(&self) -> Option<StateChange> {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed ({} probe successes)",
                        self.name, inner.probe_successes
                    );
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.probe_successes = 0;
                    inner.opened_at = None;
                    Some(StateChange {
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Closed,
                        reason: "probe succeeded".to_string(),
                    })
                } else {
                    None
                }
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
                None
            }
        }
    }

    pub async fn record_failure(&self, reason: &str) -> Option<StateChange> {
        let mut inner = self.inner.write().await;

        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} consecutive failures, last: {})",
                        self.name, inner.consecutive_failures, reason
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    Some(StateChange {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                        reason: reason.to_string(),
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens and restarts the recovery timer
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (probe failed: {})",
                    self.name, reason
                );
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.probe_successes = 0;
                inner.opened_at = Some(Instant::now());
                Some(StateChange {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                    reason: format!("probe failed: {}", reason),
                })
            }
            CircuitState::Open => None,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.read().await;
        let since_opened = inner.opened_at.map(|t| t.elapsed().as_secs_f64());
        let until_probe = match inner.state {
            CircuitState::Open => since_opened
                .map(|s| (self.config.recovery_timeout.as_secs_f64() - s).max(0.0)),
            _ => None,
        };
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            seconds_since_opened: since_opened,
            seconds_until_probe: until_probe,
        }
    }
}
