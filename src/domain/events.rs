use crate::domain::decision::Decision;
use crate::domain::position::{Discrepancy, Position};
use rust_decimal::Decimal;
use serde::Serialize;

/// Outbound engine events, consumed by dashboards and notifiers.
/// Serialized as `{"type": "...", ...}` on the wire; fan-out to sinks
/// happens on the infrastructure event bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    CycleCompleted {
        cycle: u64,
        symbols_processed: usize,
        decisions: usize,
        health_status: String,
    },
    DecisionEmitted {
        symbol: String,
        final_action: String,
        confidence: f64,
        contributing_signals: usize,
    },
    PositionOpened {
        position_id: String,
        symbol: String,
        side: String,
        entry_price: Decimal,
        amount: Decimal,
        strategy: String,
    },
    PositionClosed {
        position_id: String,
        symbol: String,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: String,
    },
    CircuitStateChanged {
        from: String,
        to: String,
        reason: String,
    },
    RateLimitHit {
        wait_s: f64,
    },
    StopTriggered {
        position_id: String,
        symbol: String,
        stop_price: Decimal,
        last_price: Decimal,
    },
    ReconciliationDiscrepancy {
        symbol: String,
        kind: String,
        ledger_amount: Decimal,
        exchange_amount: Decimal,
    },
    RollbackTriggered {
        deployment_id: String,
        phase: String,
        reason: String,
    },
    PostmortemOpened {
        postmortem_id: String,
        deployment_id: String,
        severity: String,
    },
    PostmortemClosed {
        postmortem_id: String,
    },
    EngineStopped {
        cycles_completed: u64,
    },
}

impl EngineEvent {
    pub fn decision(decision: &Decision) -> Self {
        EngineEvent::DecisionEmitted {
            symbol: decision.symbol.clone(),
            final_action: decision.final_action.to_string(),
            confidence: decision.confidence,
            contributing_signals: decision.contributing_signals,
        }
    }

    pub fn position_opened(position: &Position) -> Self {
        EngineEvent::PositionOpened {
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            side: position.side.to_string(),
            entry_price: position.entry_price,
            amount: position.amount,
            strategy: position.strategy.clone(),
        }
    }

    pub fn position_closed(position: &Position) -> Self {
        EngineEvent::PositionClosed {
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            exit_price: position.exit_price.unwrap_or_default(),
            realized_pnl: position.realized_pnl.unwrap_or_default(),
            reason: position.close_reason.clone().unwrap_or_default(),
        }
    }

    pub fn discrepancy(d: &Discrepancy) -> Self {
        EngineEvent::ReconciliationDiscrepancy {
            symbol: d.symbol.clone(),
            kind: format!("{:?}", d.kind),
            ledger_amount: d.ledger_amount,
            exchange_amount: d.exchange_amount,
        }
    }
}
