//! Hermes promise settler
//!
//! Tracks per-identity settlement state against a hermes, applies the
//! settlement threshold to every received promise, and drives settlements
//! through a retrying settle-queue worker.

pub mod adapters;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod settler;
pub mod state;
pub mod traits;
pub mod types;
mod worker;

#[cfg(test)]
mod testing;

pub use adapters::{InMemoryHistory, InMemoryLedger, StaticIdentities};
pub use error::{ExternalError, SettlementError};
pub use metrics::MetricsSnapshot;
pub use retry::{RetryExhausted, RetryPolicy};
pub use settler::{Bootstrap, PromiseSettler, SettlerDeps};
pub use state::{PromiseUpdate, SettlementState, SettlementTable, Threshold};
pub use traits::{
    ChannelBalanceReader, LocalIdentities, PromiseSettled, PromiseStore, RegistrationOracle,
    SettledSubscription, SettlementHistory, SettlementSubmitter,
};
pub use types::{fee_for, SettleKind, SettlementHistoryEntry, SettlementRequest};
