//! The Hermes node orchestrator.
//!
//! Wires the event bus, the in-process ledger, RocksDB history and the
//! promise settler together, then serves the HTTP API.

use anyhow::Result;
use hermes_core::{AppEvent, EventBus, HermesConfig, Identity, NodeStatus, RegistrationStatus};
use hermes_settlement::{InMemoryLedger, PromiseSettler, SettlerDeps, StaticIdentities};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::HermesNodeConfig;
use crate::state::ApiState;
use crate::storage::HistoryStorage;

/// The Hermes node.
pub struct HermesNode {
    /// Node configuration.
    config: HermesNodeConfig,
    /// Validated settler configuration.
    hermes: HermesConfig,
    /// Identities loaded on node start.
    identities: Vec<Identity>,
    /// Application event bus.
    bus: EventBus,
    /// In-process channel, promise and registration ledger.
    ledger: Arc<InMemoryLedger>,
    /// The settler (None until started).
    settler: Option<Arc<PromiseSettler>>,
    /// Settle queue worker.
    worker: Option<JoinHandle<()>>,
    /// Bus listener and API server.
    tasks: Vec<JoinHandle<()>>,
    /// Address the API is bound to once started.
    api_addr: Option<std::net::SocketAddr>,
}

impl HermesNode {
    /// Create a node, validating the configuration and seeding the ledger.
    pub fn new(config: HermesNodeConfig) -> Result<Self> {
        let hermes = config.hermes_config()?;
        let identities = config.local_identities()?;

        let ledger = Arc::new(InMemoryLedger::new(config.ledger.fee_bps));
        for seed in &config.ledger.channels {
            let identity = Identity::new(seed.identity.as_str())?;
            ledger.open_channel(&identity, seed.snapshot());
            if seed.registered {
                ledger.set_registration(&identity, RegistrationStatus::Registered);
            }
        }

        tracing::info!(
            hermes = %hermes.hermes_address,
            identities = identities.len(),
            channels = config.ledger.channels.len(),
            "Hermes node created"
        );

        Ok(Self {
            config,
            hermes,
            identities,
            bus: EventBus::default(),
            ledger,
            settler: None,
            worker: None,
            tasks: Vec::new(),
            api_addr: None,
        })
    }

    /// Open storage, start the settler and the HTTP API, then announce
    /// the node start on the bus.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting Hermes node");

        let storage = Arc::new(HistoryStorage::open(&self.config.storage.data_dir)?);
        tracing::info!(path = %self.config.storage.data_dir.display(), "storage initialized");

        let settler = PromiseSettler::new(
            self.hermes.clone(),
            SettlerDeps {
                channels: self.ledger.clone(),
                promises: self.ledger.clone(),
                registrations: self.ledger.clone(),
                transactor: self.ledger.clone(),
                history: storage.clone(),
                identities: Arc::new(StaticIdentities::new(self.identities.clone())),
            },
        )?;
        self.worker = Some(settler.start()?);
        self.tasks.push(settler.subscribe(&self.bus));

        let listener = tokio::net::TcpListener::bind(self.config.api_addr()).await?;
        self.api_addr = Some(listener.local_addr()?);
        let api_state = Arc::new(ApiState::new(
            settler.clone(),
            self.ledger.clone(),
            storage,
            self.bus.clone(),
        ));
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(listener, api_state).await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        }));

        self.settler = Some(settler);
        self.bus.publish(AppEvent::Node(NodeStatus::Started));
        Ok(())
    }

    /// Run until the settle queue worker exits.
    pub async fn run(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        worker.await?;
        Ok(())
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down Hermes node");

        self.bus.publish(AppEvent::Node(NodeStatus::Stopped));
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(settler) = self.settler.take() {
            let m = settler.metrics();
            tracing::info!(
                succeeded = m.settlements_succeeded,
                failed = m.settlements_failed,
                "settler stopped"
            );
        }

        tracing::info!("Hermes node shut down");
        Ok(())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ledger(&self) -> &Arc<InMemoryLedger> {
        &self.ledger
    }

    pub fn settler(&self) -> Option<&Arc<PromiseSettler>> {
        self.settler.as_ref()
    }

    pub fn api_addr(&self) -> Option<std::net::SocketAddr> {
        self.api_addr
    }
}
