use async_trait::async_trait;
use dashmap::DashMap;
use hermes_core::{Address, ChannelSnapshot, Identity, Promise, RegistrationStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ExternalError;
use crate::traits::{
    ChannelBalanceReader, LocalIdentities, PromiseSettled, PromiseStore, RegistrationOracle,
    SettledSubscription, SettlementHistory, SettlementSubmitter,
};
use crate::types::{SettleKind, SettlementHistoryEntry};

const SUBSCRIPTION_BUFFER: usize = 16;

type Subscribers = DashMap<u64, (Identity, mpsc::Sender<PromiseSettled>)>;

/// In-process stand-in for a single hermes and its chain.
///
/// Holds channels, issued promises and registrations, and applies
/// settlements to the channel the way the hermes contract does: the promise
/// amount becomes the new cumulative `settled`, and the channel is either
/// rebalanced up to its stake or the settled amount is added to the stake.
pub struct InMemoryLedger {
    channels: DashMap<Identity, ChannelSnapshot>,
    promises: DashMap<Identity, Promise>,
    registrations: DashMap<Identity, RegistrationStatus>,
    subscribers: Arc<Subscribers>,
    next_subscription: AtomicU64,
    fee_bps: u16,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    settled_order: Mutex<Vec<Identity>>,
}

impl InMemoryLedger {
    /// Create an empty ledger charging `fee_bps` basis points.
    pub fn new(fee_bps: u16) -> Self {
        Self {
            channels: DashMap::new(),
            promises: DashMap::new(),
            registrations: DashMap::new(),
            subscribers: Arc::new(DashMap::new()),
            next_subscription: AtomicU64::new(0),
            fee_bps,
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            settled_order: Mutex::new(Vec::new()),
        }
    }

    pub fn open_channel(&self, identity: &Identity, channel: ChannelSnapshot) {
        self.channels.insert(identity.clone(), channel);
    }

    pub fn channel(&self, identity: &Identity) -> Option<ChannelSnapshot> {
        self.channels.get(identity).map(|c| *c)
    }

    /// Record the latest promise issued to the hermes for `identity`.
    pub fn issue_promise(&self, identity: &Identity, promise: Promise) {
        self.promises.insert(identity.clone(), promise);
    }

    pub fn set_registration(&self, identity: &Identity, status: RegistrationStatus) {
        self.registrations.insert(identity.clone(), status);
    }

    /// Make the next `count` settlement submissions fail.
    pub fn fail_next_settlements(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Submissions seen so far, failed ones included.
    pub fn settlement_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Identities in the order their settlements went through.
    pub fn settled_identities(&self) -> Vec<Identity> {
        self.settled_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn apply_settlement(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
        kind: SettleKind,
    ) -> Result<PromiseSettled, ExternalError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExternalError::Unavailable("transaction reverted".into()));
        }

        let mut channel = self
            .channels
            .get_mut(identity)
            .ok_or(ExternalError::NotFound)?;
        if promise.amount <= channel.settled {
            return Err(ExternalError::Rejected(format!(
                "promise {} already settled up to {}",
                promise.amount, channel.settled
            )));
        }

        let amount = promise.amount - channel.settled;
        channel.settled = promise.amount;
        match kind {
            SettleKind::Settle => channel.balance = channel.stake,
            SettleKind::IntoStake => channel.stake = channel.stake.saturating_add(amount),
        }
        drop(channel);

        self.settled_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(identity.clone());

        Ok(PromiseSettled {
            identity: identity.clone(),
            hermes,
            amount,
            total_settled: promise.amount,
            tx_hash: Some(format!("0x{}", Uuid::now_v7().simple())),
        })
    }

    fn notify(&self, event: &PromiseSettled) {
        let senders: Vec<_> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().0 == event.identity)
            .map(|entry| entry.value().1.clone())
            .collect();
        for tx in senders {
            if tx.try_send(event.clone()).is_err() {
                tracing::debug!(identity = %event.identity, "settlement subscriber not keeping up");
            }
        }
    }

    async fn submit(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
        kind: SettleKind,
    ) -> Result<(), ExternalError> {
        let settled = self.apply_settlement(identity, hermes, promise, kind)?;
        tracing::info!(
            identity = %identity,
            amount = %settled.amount,
            %kind,
            "in-memory settlement applied"
        );
        self.notify(&settled);
        Ok(())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl ChannelBalanceReader for InMemoryLedger {
    async fn get_channel(
        &self,
        _hermes: Address,
        identity: &Identity,
    ) -> Result<ChannelSnapshot, ExternalError> {
        self.channel(identity).ok_or(ExternalError::NotFound)
    }

    async fn get_fee(&self, _hermes: Address) -> Result<u16, ExternalError> {
        Ok(self.fee_bps)
    }

    async fn subscribe_to_settled(
        &self,
        identity: &Identity,
        _hermes: Address,
    ) -> Result<SettledSubscription, ExternalError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers.insert(id, (identity.clone(), tx));

        let subscribers = Arc::clone(&self.subscribers);
        Ok(SettledSubscription::new(rx, move || {
            subscribers.remove(&id);
        }))
    }
}

#[async_trait]
impl PromiseStore for InMemoryLedger {
    async fn get_promise(
        &self,
        identity: &Identity,
        _hermes: Address,
    ) -> Result<Promise, ExternalError> {
        self.promises
            .get(identity)
            .map(|p| p.clone())
            .ok_or(ExternalError::NotFound)
    }
}

#[async_trait]
impl RegistrationOracle for InMemoryLedger {
    async fn get_registration_status(
        &self,
        identity: &Identity,
    ) -> Result<RegistrationStatus, ExternalError> {
        Ok(self
            .registrations
            .get(identity)
            .map(|s| *s)
            .unwrap_or(RegistrationStatus::Unregistered))
    }
}

#[async_trait]
impl SettlementSubmitter for InMemoryLedger {
    async fn settle(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError> {
        self.submit(identity, hermes, promise, SettleKind::Settle).await
    }

    async fn settle_into_stake(
        &self,
        identity: &Identity,
        hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError> {
        self.submit(identity, hermes, promise, SettleKind::IntoStake)
            .await
    }
}

/// Settlement history kept in memory.
#[derive(Default)]
pub struct InMemoryHistory {
    entries: DashMap<Identity, Vec<SettlementHistoryEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store` fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementHistory for InMemoryHistory {
    async fn store(&self, entry: &SettlementHistoryEntry) -> Result<(), ExternalError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ExternalError::Unavailable("history store offline".into()));
        }
        self.entries
            .entry(entry.identity.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<SettlementHistoryEntry>, ExternalError> {
        Ok(self
            .entries
            .get(identity)
            .map(|e| e.clone())
            .unwrap_or_default())
    }
}

/// A fixed set of local identities.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities(Vec<Identity>);

impl StaticIdentities {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self(identities)
    }
}

impl LocalIdentities for StaticIdentities {
    fn identities(&self) -> Vec<Identity> {
        self.0.clone()
    }
}
