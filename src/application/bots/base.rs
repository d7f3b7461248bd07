use crate::application::bots::BotStatus;
use crate::application::safety::SafetyEnvelope;
use crate::domain::market::validate_symbol;
use crate::domain::ports::PositionLedger;
use crate::infrastructure::exchange::ExchangeAdapter;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Handles a bot may need, passed to every bot constructor by the registry
#[derive(Clone)]
pub struct BotContext {
    pub adapter: Arc<ExchangeAdapter>,
    pub ledger: Arc<dyn PositionLedger>,
    pub envelope: Arc<SafetyEnvelope>,
}

/// Shared scaffolding: identity, health flag and per-bot counters.
/// Concrete bots embed one of these and expose it via `status()`.
pub struct BotCore {
    name: String,
    version: String,
    signals_emitted: AtomicU64,
    errors: AtomicU64,
    healthy: AtomicBool,
}

impl BotCore {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            signals_emitted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn note_signal(&self) {
        self.signals_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> BotStatus {
        let mut metrics = serde_json::Map::new();
        metrics.insert(
            "signals_emitted".to_string(),
            self.signals_emitted.load(Ordering::Relaxed).into(),
        );
        metrics.insert(
            "errors".to_string(),
            self.errors.load(Ordering::Relaxed).into(),
        );

        BotStatus {
            name: self.name.clone(),
            version: self.version.clone(),
            healthy: self.is_healthy(),
            metrics,
        }
    }

    /// Input guards. Violations are programmer errors surfaced as typed
    /// failures so a misbehaving caller cannot place malformed orders.
    pub fn ensure_symbol(symbol: &str) -> anyhow::Result<()> {
        validate_symbol(symbol).map_err(|e| anyhow::anyhow!(e))
    }

    pub fn ensure_amount(amount: Decimal) -> anyhow::Result<()> {
        if amount <= Decimal::ZERO {
            anyhow::bail!("amount must be positive, got {}", amount);
        }
        Ok(())
    }
}
