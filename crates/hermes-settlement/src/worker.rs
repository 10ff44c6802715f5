//! Settle queue worker.
//!
//! A single task drains the settle queue in FIFO order. Each request is
//! submitted with retries bounded by `max_wait_for_settlement`; whatever the
//! outcome, the identity's in-progress flag is lowered afterwards so a later
//! promise can trigger the next settlement.

use hermes_core::Identity;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SettlementError;
use crate::settler::PromiseSettler;
use crate::traits::{PromiseSettled, SettledSubscription};
use crate::types::{fee_for, SettleKind, SettlementHistoryEntry, SettlementRequest};

impl PromiseSettler {
    pub(crate) async fn run_worker(self: Arc<Self>, mut queue: mpsc::Receiver<SettlementRequest>) {
        tracing::info!("settle queue worker started");
        while let Some(request) = queue.recv().await {
            let identity = request.identity.clone();
            match self.process(request).await {
                Ok(entry) => {
                    self.metrics.settlement_succeeded();
                    tracing::info!(
                        identity = %identity,
                        amount = %entry.amount,
                        tx_hash = entry.tx_hash.as_deref().unwrap_or("-"),
                        "settlement complete"
                    );
                }
                Err(e) => {
                    self.metrics.settlement_failed();
                    tracing::error!(identity = %identity, error = %e, "settlement dropped");
                }
            }
            self.state.set_settle_in_progress(&identity, false);
        }
        tracing::info!("settle queue closed, worker exiting");
    }

    /// Submit one settlement and record it.
    ///
    /// A history write failure is reported but does not fail the settlement:
    /// the transaction already went through.
    async fn process(
        &self,
        request: SettlementRequest,
    ) -> Result<SettlementHistoryEntry, SettlementError> {
        let hermes = self.config.hermes_address;
        let identity = &request.identity;

        let subscription = match self.deps.channels.subscribe_to_settled(identity, hermes).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "could not subscribe to settlement events");
                None
            }
        };

        let fee_bps = match self.deps.channels.get_fee(hermes).await {
            Ok(fee) => Some(fee),
            Err(e) => {
                tracing::warn!(hermes = %hermes, error = %e, "could not get hermes fee");
                None
            }
        };

        let transactor = &self.deps.transactor;
        let promise = &request.promise;
        let kind = request.kind;
        // the window starts with the first submission attempt
        let deadline = Instant::now() + self.config.max_wait_for_settlement;
        self.retry
            .run_until(deadline, move |attempt| async move {
                tracing::debug!(identity = %identity, attempt, %kind, "submitting settlement");
                match kind {
                    SettleKind::Settle => transactor.settle(identity, hermes, promise).await,
                    SettleKind::IntoStake => {
                        transactor.settle_into_stake(identity, hermes, promise).await
                    }
                }
            })
            .await
            .map_err(|exhausted| SettlementError::Submission {
                identity: identity.clone(),
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })?;

        let expected_amount = self
            .state
            .get(identity)
            .map(|s| promise.amount.saturating_sub(s.channel.settled))
            .unwrap_or(promise.amount);

        let mut entry = SettlementHistoryEntry::new(
            identity.clone(),
            hermes,
            kind,
            expected_amount,
            promise.amount,
        );
        if let Some(confirmed) = self.await_confirmation(identity, subscription, deadline).await {
            entry.amount = confirmed.amount;
            entry.tx_hash = confirmed.tx_hash;
        }
        entry.fees = fee_bps.map(|bps| fee_for(entry.amount, bps));

        if let Err(source) = self.deps.history.store(&entry).await {
            self.metrics.history_failed();
            let err = SettlementError::History {
                identity: identity.clone(),
                source,
            };
            tracing::error!(error = %err, "settlement went through but was not recorded");
        }

        if let Err(e) = self.resync(identity).await {
            tracing::warn!(identity = %identity, error = %e, "could not resync after settlement");
        }

        Ok(entry)
    }

    async fn await_confirmation(
        &self,
        identity: &Identity,
        subscription: Option<SettledSubscription>,
        deadline: Instant,
    ) -> Option<PromiseSettled> {
        let mut subscription = subscription?;
        let confirmed = match tokio::time::timeout_at(deadline, subscription.next()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                tracing::warn!(identity = %identity, "settlement event stream closed");
                None
            }
            Err(_) => {
                tracing::warn!(identity = %identity, "no settlement confirmation before deadline");
                None
            }
        };
        subscription.cancel();
        confirmed
    }
}
