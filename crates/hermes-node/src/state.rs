//! Shared state handed to the HTTP API handlers.

use hermes_core::EventBus;
use hermes_settlement::{InMemoryLedger, PromiseSettler, SettlementHistory};
use std::sync::Arc;
use std::time::Instant;

pub struct ApiState {
    pub settler: Arc<PromiseSettler>,
    pub ledger: Arc<InMemoryLedger>,
    pub history: Arc<dyn SettlementHistory>,
    pub bus: EventBus,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(
        settler: Arc<PromiseSettler>,
        ledger: Arc<InMemoryLedger>,
        history: Arc<dyn SettlementHistory>,
        bus: EventBus,
    ) -> Self {
        Self {
            settler,
            ledger,
            history,
            bus,
            start_time: Instant::now(),
        }
    }
}
