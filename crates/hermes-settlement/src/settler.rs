//! The promise settler.
//!
//! Keeps a [`SettlementState`] per identity, reacts to node, service,
//! registration and promise events, and decides when a settlement must be
//! submitted. Settlements are handed to a single worker over a bounded queue
//! (see `worker.rs`).
//!
//! The table lock is never held across a network call: resync fetches first
//! and writes the snapshot in one step afterwards.

use futures::future::join_all;
use hermes_core::{
    AppEvent, EventBus, HermesConfig, HermesPromiseEvent, Identity, NodeStatus, Promise,
    RegistrationEvent, ServiceState, ServiceStatusEvent,
};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{ExternalError, SettlementError};
use crate::metrics::{MetricsSnapshot, SettlerMetrics};
use crate::retry::RetryPolicy;
use crate::state::{PromiseUpdate, SettlementState, SettlementTable, Threshold};
use crate::traits::{
    ChannelBalanceReader, LocalIdentities, PromiseStore, RegistrationOracle, SettlementHistory,
    SettlementSubmitter,
};
use crate::types::{SettleKind, SettlementRequest};

/// External collaborators of the settler.
#[derive(Clone)]
pub struct SettlerDeps {
    pub channels: Arc<dyn ChannelBalanceReader>,
    pub promises: Arc<dyn PromiseStore>,
    pub registrations: Arc<dyn RegistrationOracle>,
    pub transactor: Arc<dyn SettlementSubmitter>,
    pub history: Arc<dyn SettlementHistory>,
    pub identities: Arc<dyn LocalIdentities>,
}

/// Tracks earnings per identity and settles them with the hermes.
pub struct PromiseSettler {
    pub(crate) config: HermesConfig,
    threshold: Threshold,
    pub(crate) retry: RetryPolicy,
    pub(crate) deps: SettlerDeps,
    pub(crate) state: SettlementTable,
    pub(crate) metrics: SettlerMetrics,
    settle_tx: mpsc::Sender<SettlementRequest>,
    settle_rx: Mutex<Option<mpsc::Receiver<SettlementRequest>>>,
}

/// Background state loads spawned on node start.
///
/// Dropping the handle detaches the loads; [`Bootstrap::wait`] joins them.
#[derive(Debug)]
pub struct Bootstrap {
    tasks: Vec<JoinHandle<()>>,
}

impl Bootstrap {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every load finished.
    pub async fn wait(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "bootstrap task aborted");
            }
        }
    }
}

impl PromiseSettler {
    /// Create a settler. Fails on an invalid configuration.
    pub fn new(config: HermesConfig, deps: SettlerDeps) -> Result<Arc<Self>, SettlementError> {
        config.validate()?;

        let (settle_tx, settle_rx) = mpsc::channel(config.settle_queue_capacity);
        let retry = RetryPolicy::from(&config.retry);
        let threshold = Threshold::from_fraction(config.threshold);
        tracing::info!(
            hermes = %config.hermes_address,
            threshold_ppb = threshold.parts_per_billion(),
            max_wait_ms = config.max_wait_for_settlement.as_millis() as u64,
            "promise settler created"
        );

        Ok(Arc::new(Self {
            config,
            threshold,
            retry,
            deps,
            state: SettlementTable::new(),
            metrics: SettlerMetrics::default(),
            settle_tx,
            settle_rx: Mutex::new(Some(settle_rx)),
        }))
    }

    pub fn config(&self) -> &HermesConfig {
        &self.config
    }

    /// Current snapshot of an identity, if tracked.
    pub fn state(&self, identity: &Identity) -> Option<SettlementState> {
        self.state.get(identity)
    }

    pub fn tracked_identities(&self) -> Vec<Identity> {
        self.state.identities()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the settle queue worker. Can only be called once.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, SettlementError> {
        let rx = self
            .settle_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(SettlementError::AlreadyStarted)?;
        let settler = Arc::clone(self);
        Ok(tokio::spawn(settler.run_worker(rx)))
    }

    /// Dispatch bus events to the handlers, one task per event.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let settler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let settler = Arc::clone(&settler);
                        tokio::spawn(async move { settler.handle_event(event).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "settler event receiver lagged, reloading local identities");
                        settler.handle_node_start();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bus closed, settler unsubscribed");
                        break;
                    }
                }
            }
        })
    }

    async fn handle_event(self: Arc<Self>, event: AppEvent) {
        match event {
            AppEvent::Node(NodeStatus::Started) => {
                self.handle_node_start();
            }
            AppEvent::Node(NodeStatus::Stopped) => {
                tracing::debug!("node stopping");
            }
            AppEvent::ServiceStatus(ev) => self.handle_service_event(&ev).await,
            AppEvent::IdentityRegistration(ev) => self.handle_registration_event(&ev).await,
            AppEvent::HermesPromise(ev) => self.handle_hermes_promise_received(&ev).await,
        }
    }

    /// Replace the identity's snapshot with fresh channel and promise data.
    ///
    /// Either both fetches succeed and the snapshot is replaced, or nothing
    /// is written.
    pub async fn resync(&self, identity: &Identity) -> Result<SettlementState, SettlementError> {
        let hermes = self.config.hermes_address;

        let channel = self
            .deps
            .channels
            .get_channel(hermes, identity)
            .await
            .map_err(|source| SettlementError::Channel {
                identity: identity.clone(),
                source,
            })?;

        let promise = match self.deps.promises.get_promise(identity, hermes).await {
            Ok(promise) => promise,
            Err(ExternalError::NotFound) => Promise::default(),
            Err(source) => {
                return Err(SettlementError::Promise {
                    identity: identity.clone(),
                    source,
                })
            }
        };

        let state = self.state.replace_snapshot(identity, channel, promise);
        tracing::info!(
            identity = %identity,
            balance = %state.balance(),
            available = %state.available_balance(),
            unsettled = %state.unsettled_balance(),
            "settlement state resynced"
        );
        Ok(state)
    }

    /// Start tracking a registered identity. No-op when already tracked or
    /// not registered.
    pub async fn load_initial_state(&self, identity: &Identity) -> Result<(), SettlementError> {
        if self.state.contains(identity) {
            tracing::debug!(identity = %identity, "state already loaded, skipping");
            return Ok(());
        }

        let status = self
            .deps
            .registrations
            .get_registration_status(identity)
            .await
            .map_err(|source| SettlementError::Registration {
                identity: identity.clone(),
                source,
            })?;

        if !status.is_registered() {
            tracing::debug!(identity = %identity, %status, "identity not registered, skipping");
            return Ok(());
        }

        self.resync(identity).await.map(|_| ())
    }

    /// Load state for every local identity in the background.
    pub fn handle_node_start(self: &Arc<Self>) -> Bootstrap {
        let identities = self.deps.identities.identities();
        tracing::info!(count = identities.len(), "loading initial settlement state");

        let tasks = identities
            .into_iter()
            .map(|identity| {
                let settler = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = settler.load_initial_state(&identity).await {
                        tracing::error!(identity = %identity, error = %e, "could not load initial state");
                    }
                })
            })
            .collect();
        Bootstrap { tasks }
    }

    /// A provider only needs tracking once a service is running.
    pub async fn handle_service_event(&self, event: &ServiceStatusEvent) {
        if event.status != ServiceState::Running {
            return;
        }
        if let Err(e) = self.load_initial_state(&event.provider_id).await {
            tracing::error!(identity = %event.provider_id, error = %e, "could not load initial state");
        }
    }

    /// Registration completing after the service started.
    pub async fn handle_registration_event(&self, event: &RegistrationEvent) {
        if !event.status.is_registered() {
            return;
        }
        if let Err(e) = self.load_initial_state(&event.identity).await {
            tracing::error!(identity = %event.identity, error = %e, "could not load initial state");
        }
    }

    /// Apply a new promise and enqueue a settlement once the threshold is hit.
    pub async fn handle_hermes_promise_received(&self, event: &HermesPromiseEvent) {
        if event.hermes_id != self.config.hermes_address {
            tracing::debug!(hermes = %event.hermes_id, "promise for another hermes ignored");
            return;
        }
        self.metrics.promise_event();

        let identity = &event.provider_id;
        match self
            .state
            .apply_promise(identity, event.promise.clone(), self.threshold)
        {
            PromiseUpdate::Untracked => {
                tracing::debug!(identity = %identity, "promise for untracked identity ignored");
            }
            PromiseUpdate::Stale { current } => {
                tracing::warn!(
                    identity = %identity,
                    received = %event.promise.amount,
                    current = %current,
                    "promise lower than the last one ignored"
                );
            }
            PromiseUpdate::Applied { settle: false, balance } => {
                tracing::trace!(identity = %identity, balance = %balance, "promise applied");
            }
            PromiseUpdate::Applied { settle: true, balance } => {
                tracing::info!(identity = %identity, balance = %balance, "balance below threshold, requesting settlement");
                let request = SettlementRequest {
                    identity: identity.clone(),
                    promise: event.promise.clone(),
                    kind: SettleKind::Settle,
                };
                if let Err(e) = self.enqueue(request).await {
                    tracing::error!(identity = %identity, error = %e, "could not enqueue settlement");
                }
            }
        }
    }

    /// Settle the identity's latest promise regardless of the threshold.
    pub async fn force_settle(&self, identity: &Identity) -> Result<(), SettlementError> {
        self.request_settlement(identity, SettleKind::Settle).await
    }

    /// Settle the identity's latest promise into its stake.
    pub async fn settle_into_stake(&self, identity: &Identity) -> Result<(), SettlementError> {
        self.request_settlement(identity, SettleKind::IntoStake).await
    }

    async fn request_settlement(
        &self,
        identity: &Identity,
        kind: SettleKind,
    ) -> Result<(), SettlementError> {
        let status = self
            .deps
            .registrations
            .get_registration_status(identity)
            .await
            .map_err(|source| SettlementError::Registration {
                identity: identity.clone(),
                source,
            })?;
        if !status.is_registered() {
            return Err(SettlementError::NotRegistered(identity.clone()));
        }

        self.resync(identity).await?;
        let promise = self.state.begin_settlement(identity)?;
        tracing::info!(identity = %identity, %kind, amount = %promise.amount, "manual settlement requested");
        self.enqueue(SettlementRequest {
            identity: identity.clone(),
            promise,
            kind,
        })
        .await
    }

    /// Push a request on the settle queue. The caller has already raised the
    /// in-progress flag; it is lowered again if the queue is gone.
    async fn enqueue(&self, request: SettlementRequest) -> Result<(), SettlementError> {
        let identity = request.identity.clone();
        if self.settle_tx.send(request).await.is_err() {
            self.state.set_settle_in_progress(&identity, false);
            return Err(SettlementError::QueueClosed);
        }
        self.metrics.settlement_enqueued();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn take_queue(&self) -> mpsc::Receiver<SettlementRequest> {
        self.settle_rx
            .lock()
            .unwrap()
            .take()
            .expect("settle queue already taken")
    }
}
