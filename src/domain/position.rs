use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for LONG, -1 for SHORT
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            _ => anyhow::bail!("Invalid position side: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            _ => anyhow::bail!("Invalid position status: {}", s),
        }
    }
}

/// `(exit - entry) * amount * side_sign - fees`
pub fn realized_pnl(
    entry_price: Decimal,
    exit_price: Decimal,
    amount: Decimal,
    side: PositionSide,
    fees: Decimal,
) -> Decimal {
    (exit_price - entry_price) * amount * side.sign() - fees
}

/// One ledger row. Created only by opening, mutated only by the single
/// OPEN -> CLOSED transition, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub amount: Decimal,
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    pub close_reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Signed exposure in base units: positive long, negative short
    pub fn signed_amount(&self) -> Decimal {
        self.amount * self.side.sign()
    }
}

/// Request payload for opening a position
#[derive(Debug, Clone)]
pub struct OpenPositionRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub amount: Decimal,
    pub strategy: String,
    pub metadata: serde_json::Value,
}

/// Kinds of ledger/exchange disagreement found during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    /// Ledger holds an open position the exchange does not reflect
    MissingOnExchange,
    /// Both sides know the symbol but the amounts differ
    AmountMismatch,
    /// The exchange holds an asset with no open ledger position
    UntrackedHolding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub symbol: String,
    pub kind: DiscrepancyKind,
    pub ledger_amount: Decimal,
    pub exchange_amount: Decimal,
}

/// Result of a reconciliation pass. Reporting only; resolution is an
/// explicit operator or policy action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub open_positions_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconcileSummary {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}
