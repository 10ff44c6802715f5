use async_trait::async_trait;
use hermes_core::{Address, ChannelSnapshot, Identity, Promise, RegistrationStatus};
use tokio::sync::mpsc;

use crate::error::ExternalError;
use crate::types::SettlementHistoryEntry;

/// Reads on-chain channel state for an identity against a hermes.
#[async_trait]
pub trait ChannelBalanceReader: Send + Sync {
    /// Fetch the current channel snapshot.
    async fn get_channel(
        &self,
        hermes: Address,
        identity: &Identity,
    ) -> Result<ChannelSnapshot, ExternalError>;

    /// Fetch the hermes fee in basis points (1/100 of a percent).
    async fn get_fee(&self, hermes: Address) -> Result<u16, ExternalError>;

    /// Subscribe to "promise settled" events for the identity.
    async fn subscribe_to_settled(
        &self,
        identity: &Identity,
        hermes: Address,
    ) -> Result<SettledSubscription, ExternalError>;
}

/// Source of the latest promise issued to a hermes for an identity.
#[async_trait]
pub trait PromiseStore: Send + Sync {
    /// Returns [`ExternalError::NotFound`] when no promise was ever issued.
    async fn get_promise(&self, identity: &Identity, hermes: Address)
        -> Result<Promise, ExternalError>;
}

/// On-chain registration lookups.
#[async_trait]
pub trait RegistrationOracle: Send + Sync {
    async fn get_registration_status(
        &self,
        identity: &Identity,
    ) -> Result<RegistrationStatus, ExternalError>;
}

/// Submits settlement transactions.
#[async_trait]
pub trait SettlementSubmitter: Send + Sync {
    /// Settle the promise and rebalance the channel.
    async fn settle(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError>;

    /// Settle the promise into the channel stake.
    async fn settle_into_stake(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError>;
}

/// Append-only record of completed settlements.
#[async_trait]
pub trait SettlementHistory: Send + Sync {
    async fn store(&self, entry: &SettlementHistoryEntry) -> Result<(), ExternalError>;

    /// Entries recorded for the identity, oldest first.
    async fn list(&self, identity: &Identity) -> Result<Vec<SettlementHistoryEntry>, ExternalError>;
}

/// Identities configured on this node.
pub trait LocalIdentities: Send + Sync {
    fn identities(&self) -> Vec<Identity>;
}

/// On-chain confirmation that a promise was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromiseSettled {
    pub identity: Identity,
    pub hermes: Address,
    /// Amount moved by this settlement.
    pub amount: u128,
    /// Cumulative settled amount after this settlement.
    pub total_settled: u128,
    /// Transaction hash, when the chain reports one.
    pub tx_hash: Option<String>,
}

/// A live subscription to [`PromiseSettled`] events.
///
/// Dropping the subscription cancels it.
pub struct SettledSubscription {
    events: mpsc::Receiver<PromiseSettled>,
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SettledSubscription {
    pub fn new(
        events: mpsc::Receiver<PromiseSettled>,
        on_cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            events,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Wait for the next settlement. `None` once the source went away.
    pub async fn next(&mut self) -> Option<PromiseSettled> {
        self.events.recv().await
    }

    /// Cancel the subscription.
    pub fn cancel(self) {}
}

impl Drop for SettledSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for SettledSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettledSubscription")
            .field("cancelled", &self.on_cancel.is_none())
            .finish()
    }
}
