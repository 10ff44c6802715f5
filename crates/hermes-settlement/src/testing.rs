//! Hand-written collaborator mocks for unit tests.

use async_trait::async_trait;
use hermes_core::{
    Address, ChannelSnapshot, HermesConfig, Identity, Promise, RegistrationStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExternalError;
use crate::settler::{PromiseSettler, SettlerDeps};
use crate::traits::{
    ChannelBalanceReader, LocalIdentities, PromiseStore, RegistrationOracle, SettledSubscription,
    SettlementHistory, SettlementSubmitter,
};
use crate::types::SettlementHistoryEntry;

pub const HERMES: &str = "0x9a8B6d979e188fA3DeAa93A470C3537362FdaE92";

pub fn hermes() -> Address {
    HERMES.parse().unwrap()
}

pub fn mock_id() -> Identity {
    Identity::from_address("test")
}

pub fn err_mock() -> ExternalError {
    ExternalError::Unavailable("explosions everywhere".into())
}

pub fn mock_channel() -> ChannelSnapshot {
    ChannelSnapshot::new(1_000_000_000_000, 9_000_000, 12_312_323)
}

pub fn config() -> HermesConfig {
    let mut config = HermesConfig::new(hermes(), 0.1, Duration::from_millis(10));
    config.retry.initial_interval = Duration::from_millis(1);
    config.retry.max_interval = Duration::from_millis(2);
    config.retry.jitter = 0.0;
    config
}

#[derive(Default)]
pub struct MockChannelProvider {
    pub channel: Mutex<ChannelSnapshot>,
    pub error: Mutex<Option<ExternalError>>,
    pub fee_delay: Mutex<Duration>,
}

impl MockChannelProvider {
    pub fn returning(channel: ChannelSnapshot) -> Self {
        Self {
            channel: Mutex::new(channel),
            ..Default::default()
        }
    }

    pub fn set_error(&self, error: Option<ExternalError>) {
        *self.error.lock().unwrap() = error;
    }

    /// Make every fee lookup take `delay`.
    pub fn delay_fee(&self, delay: Duration) {
        *self.fee_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl ChannelBalanceReader for MockChannelProvider {
    async fn get_channel(
        &self,
        _hermes: Address,
        _identity: &Identity,
    ) -> Result<ChannelSnapshot, ExternalError> {
        if let Some(e) = self.error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(*self.channel.lock().unwrap())
    }

    async fn get_fee(&self, _hermes: Address) -> Result<u16, ExternalError> {
        let delay = *self.fee_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(0)
    }

    async fn subscribe_to_settled(
        &self,
        _identity: &Identity,
        _hermes: Address,
    ) -> Result<SettledSubscription, ExternalError> {
        Err(ExternalError::Unavailable("subscriptions not supported".into()))
    }
}

#[derive(Default)]
pub struct MockPromiseStore {
    pub promise: Mutex<Promise>,
    pub error: Mutex<Option<ExternalError>>,
}

impl MockPromiseStore {
    pub fn returning(promise: Promise) -> Self {
        Self {
            promise: Mutex::new(promise),
            error: Mutex::new(None),
        }
    }

    pub fn set_error(&self, error: Option<ExternalError>) {
        *self.error.lock().unwrap() = error;
    }
}

#[async_trait]
impl PromiseStore for MockPromiseStore {
    async fn get_promise(
        &self,
        _identity: &Identity,
        _hermes: Address,
    ) -> Result<Promise, ExternalError> {
        if let Some(e) = self.error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.promise.lock().unwrap().clone())
    }
}

/// Unknown identities report `Unregistered`.
#[derive(Default)]
pub struct MockRegistrations {
    pub identities: Mutex<HashMap<Identity, Result<RegistrationStatus, ExternalError>>>,
}

impl MockRegistrations {
    pub fn with(identity: Identity, status: RegistrationStatus) -> Self {
        let mock = Self::default();
        mock.set(identity, Ok(status));
        mock
    }

    pub fn set(&self, identity: Identity, result: Result<RegistrationStatus, ExternalError>) {
        self.identities.lock().unwrap().insert(identity, result);
    }
}

#[async_trait]
impl RegistrationOracle for MockRegistrations {
    async fn get_registration_status(
        &self,
        identity: &Identity,
    ) -> Result<RegistrationStatus, ExternalError> {
        self.identities
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .unwrap_or(Ok(RegistrationStatus::Unregistered))
    }
}

/// Records successful submissions; `fail_next` makes the next calls fail.
#[derive(Default)]
pub struct MockTransactor {
    pub settled: Mutex<Vec<(Identity, Promise)>>,
    pub staked: Mutex<Vec<(Identity, Promise)>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
}

impl MockTransactor {
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> Result<(), ExternalError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(err_mock());
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementSubmitter for MockTransactor {
    async fn settle(
        &self,
        identity: &Identity,
        _hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError> {
        self.attempt()?;
        self.settled
            .lock()
            .unwrap()
            .push((identity.clone(), promise.clone()));
        Ok(())
    }

    async fn settle_into_stake(
        &self,
        identity: &Identity,
        _hermes: Address,
        promise: &Promise,
    ) -> Result<(), ExternalError> {
        self.attempt()?;
        self.staked
            .lock()
            .unwrap()
            .push((identity.clone(), promise.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHistory {
    pub entries: Mutex<Vec<SettlementHistoryEntry>>,
}

#[async_trait]
impl SettlementHistory for MockHistory {
    async fn store(&self, entry: &SettlementHistoryEntry) -> Result<(), ExternalError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn list(&self, identity: &Identity) -> Result<Vec<SettlementHistoryEntry>, ExternalError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.identity == identity)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockKeystore(pub Vec<Identity>);

impl LocalIdentities for MockKeystore {
    fn identities(&self) -> Vec<Identity> {
        self.0.clone()
    }
}

/// Mocks wired into a settler, kept around for assertions.
pub struct Fixture {
    pub channels: Arc<MockChannelProvider>,
    pub promises: Arc<MockPromiseStore>,
    pub registrations: Arc<MockRegistrations>,
    pub transactor: Arc<MockTransactor>,
    pub history: Arc<MockHistory>,
    pub keystore: Arc<MockKeystore>,
}

impl Fixture {
    pub fn new(channels: MockChannelProvider, promises: MockPromiseStore, registrations: MockRegistrations) -> Self {
        Self {
            channels: Arc::new(channels),
            promises: Arc::new(promises),
            registrations: Arc::new(registrations),
            transactor: Arc::new(MockTransactor::default()),
            history: Arc::new(MockHistory::default()),
            keystore: Arc::new(MockKeystore::default()),
        }
    }

    pub fn with_keystore(mut self, identities: Vec<Identity>) -> Self {
        self.keystore = Arc::new(MockKeystore(identities));
        self
    }

    pub fn deps(&self) -> SettlerDeps {
        SettlerDeps {
            channels: self.channels.clone(),
            promises: self.promises.clone(),
            registrations: self.registrations.clone(),
            transactor: self.transactor.clone(),
            history: self.history.clone(),
            identities: self.keystore.clone(),
        }
    }

    pub fn settler(&self) -> Arc<PromiseSettler> {
        PromiseSettler::new(config(), self.deps()).unwrap()
    }
}
