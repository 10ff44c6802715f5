//! Harness for the end-to-end settlement tests.
//!
//! Wires a [`PromiseSettler`] to an [`InMemoryLedger`], an
//! [`InMemoryHistory`] and an [`EventBus`], with the worker and bus listener
//! already running.

use hermes_core::{
    Address, AppEvent, ChannelSnapshot, EventBus, HermesConfig, HermesPromiseEvent, Identity,
    NodeStatus, Promise, RegistrationEvent, RegistrationStatus,
};
use hermes_settlement::{
    InMemoryHistory, InMemoryLedger, PromiseSettler, SettlementState, SettlerDeps,
    StaticIdentities,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const HERMES: &str = "0x9a8B6d979e188fA3DeAa93A470C3537362FdaE92";

/// How long `wait_for` polls before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn hermes() -> Address {
    HERMES.parse().expect("valid hermes address")
}

/// Settler config with a short window and fast retries.
pub fn fast_config(threshold: f64) -> HermesConfig {
    let mut config = HermesConfig::new(hermes(), threshold, Duration::from_secs(2));
    config.retry.initial_interval = Duration::from_millis(2);
    config.retry.max_interval = Duration::from_millis(5);
    config.retry.jitter = 0.0;
    config
}

pub struct Harness {
    pub bus: EventBus,
    pub ledger: Arc<InMemoryLedger>,
    pub history: Arc<InMemoryHistory>,
    pub settler: Arc<PromiseSettler>,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Start a settler over the given local identities.
    pub fn start(config: HermesConfig, identities: Vec<Identity>) -> Self {
        Self::start_with_ledger(config, identities, InMemoryLedger::default())
    }

    pub fn start_with_ledger(
        config: HermesConfig,
        identities: Vec<Identity>,
        ledger: InMemoryLedger,
    ) -> Self {
        let bus = EventBus::new(64);
        let ledger = Arc::new(ledger);
        let history = Arc::new(InMemoryHistory::new());
        let settler = PromiseSettler::new(
            config,
            SettlerDeps {
                channels: ledger.clone(),
                promises: ledger.clone(),
                registrations: ledger.clone(),
                transactor: ledger.clone(),
                history: history.clone(),
                identities: Arc::new(StaticIdentities::new(identities)),
            },
        )
        .expect("valid settler config");

        let worker = settler.start().expect("worker starts once");
        let listener = settler.subscribe(&bus);
        Self {
            bus,
            ledger,
            history,
            settler,
            tasks: vec![worker, listener],
        }
    }

    /// Open a registered channel.
    pub fn open_registered(&self, identity: &Identity, channel: ChannelSnapshot) {
        self.ledger.open_channel(identity, channel);
        self.ledger
            .set_registration(identity, RegistrationStatus::Registered);
    }

    pub fn node_started(&self) {
        self.bus.publish(AppEvent::Node(NodeStatus::Started));
    }

    pub fn registered(&self, identity: &Identity) {
        self.ledger
            .set_registration(identity, RegistrationStatus::Registered);
        self.bus
            .publish(AppEvent::IdentityRegistration(RegistrationEvent {
                identity: identity.clone(),
                status: RegistrationStatus::Registered,
            }));
    }

    /// Issue a promise in the ledger and announce it on the bus.
    pub fn promise(&self, identity: &Identity, amount: u128) {
        let promise = Promise::with_amount(amount);
        self.ledger.issue_promise(identity, promise.clone());
        self.bus.publish(AppEvent::HermesPromise(HermesPromiseEvent {
            hermes_id: hermes(),
            provider_id: identity.clone(),
            promise,
        }));
    }

    pub fn state(&self, identity: &Identity) -> Option<SettlementState> {
        self.settler.state(identity)
    }

    /// Poll `check` until it holds; panics after [`WAIT_LIMIT`].
    pub async fn wait_for<F>(&self, what: &str, mut check: F)
    where
        F: FnMut() -> bool,
    {
        let result = tokio::time::timeout(WAIT_LIMIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "timed out waiting for {}", what);
    }

    pub async fn wait_tracked(&self, identity: &Identity) {
        self.wait_for("identity to be tracked", || self.state(identity).is_some())
            .await;
    }

    /// Wait until `count` settlements finished, successfully or not.
    pub async fn wait_settlements(&self, count: u64) {
        self.wait_for("settlements to finish", || {
            let m = self.settler.metrics();
            m.settlements_succeeded + m.settlements_failed >= count
        })
        .await;
    }

    /// Wait until the identity has no settlement in flight.
    pub async fn wait_idle(&self, identity: &Identity) {
        self.wait_for("settlement to finish", || {
            self.state(identity)
                .map(|s| !s.settle_in_progress)
                .unwrap_or(false)
        })
        .await;
    }

    /// Wait until `count` promises for the configured hermes were handled.
    pub async fn wait_promises(&self, count: u64) {
        self.wait_for("promises to be handled", || {
            self.settler.metrics().promise_events >= count
        })
        .await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        tracing::debug!("integration harness stopped");
    }
}
