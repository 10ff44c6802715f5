use chrono::{DateTime, Utc};
use hermes_core::{Address, Identity, Promise};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a promise is cashed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleKind {
    /// Settle to the beneficiary and rebalance the channel.
    Settle,
    /// Settle into the channel stake.
    IntoStake,
}

impl std::fmt::Display for SettleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settle => write!(f, "Settle"),
            Self::IntoStake => write!(f, "IntoStake"),
        }
    }
}

/// A point-in-time settlement request queued for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    pub identity: Identity,
    pub promise: Promise,
    pub kind: SettleKind,
}

/// One completed settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementHistoryEntry {
    /// Time-ordered entry identifier (UUID v7).
    pub id: Uuid,
    pub identity: Identity,
    pub hermes: Address,
    pub kind: SettleKind,
    /// Amount moved by the settlement.
    pub amount: u128,
    /// Fee charged by the hermes on `amount`, when the fee was known.
    pub fees: Option<u128>,
    /// Cumulative promise amount that was settled.
    pub promise_amount: u128,
    /// Transaction hash, when a settlement confirmation was received.
    pub tx_hash: Option<String>,
    pub settled_at: DateTime<Utc>,
}

impl SettlementHistoryEntry {
    pub fn new(
        identity: Identity,
        hermes: Address,
        kind: SettleKind,
        amount: u128,
        promise_amount: u128,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity,
            hermes,
            kind,
            amount,
            fees: None,
            promise_amount,
            tx_hash: None,
            settled_at: Utc::now(),
        }
    }
}

/// Fee owed on `amount` at `fee_bps` basis points, rounded down.
pub fn fee_for(amount: u128, fee_bps: u16) -> u128 {
    amount.saturating_mul(fee_bps as u128) / 10_000
}
