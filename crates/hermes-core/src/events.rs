//! Application events and the in-process event bus.
//!
//! Components publish lifecycle notifications on the bus; the settler
//! subscribes and reacts. Every subscriber sees every event published after
//! it subscribed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Address, Identity, Promise, RegistrationStatus};

/// Default number of buffered events per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events flowing through the node.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The node changed its own lifecycle status.
    Node(NodeStatus),

    /// A service changed state for a provider identity.
    ServiceStatus(ServiceStatusEvent),

    /// An identity's registration status changed.
    IdentityRegistration(RegistrationEvent),

    /// A new promise was issued to a hermes for a provider.
    HermesPromise(HermesPromiseEvent),
}

/// Lifecycle of the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Started,
    Stopped,
}

/// Lifecycle of a provided service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Starting,
    Running,
    NotRunning,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::NotRunning => write!(f, "NotRunning"),
        }
    }
}

/// Emitted when a service changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusEvent {
    /// The provider running the service.
    pub provider_id: Identity,
    /// Kind of service (e.g. "wireguard").
    pub service_type: String,
    /// The new state.
    pub status: ServiceState,
}

/// Emitted when an identity's on-chain registration status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub identity: Identity,
    pub status: RegistrationStatus,
}

/// Emitted once per new promise observed for (hermes, provider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HermesPromiseEvent {
    pub hermes_id: Address,
    pub provider_id: Identity,
    pub promise: Promise,
}

/// Typed broadcast bus for [`AppEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: AppEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(?event, "event published with no subscribers");
                0
            }
        }
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
