//! Integration test: promise settlement driven through the event bus.
//!
//! Exercises hermes-core events, the settler, its worker and the in-memory
//! ledger and history together.

use hermes_core::{ChannelSnapshot, Identity};
use hermes_integration_tests::{fast_config, Harness};
use hermes_settlement::{InMemoryLedger, SettleKind, SettlementError, SettlementHistory};
use std::time::Duration;

fn provider() -> Identity {
    Identity::from_address("0xprovider")
}

fn channel() -> ChannelSnapshot {
    ChannelSnapshot::new(10_000, 0, 10_000)
}

/// A harness with one registered, already-tracked provider.
async fn tracked_provider(harness: &Harness) {
    harness.open_registered(&provider(), channel());
    harness.node_started();
    harness.wait_tracked(&provider()).await;
}

// =========================================================================
// Tracking
// =========================================================================

#[tokio::test]
async fn test_node_start_loads_registered_identities_only() {
    let stranger = Identity::from_address("0xstranger");
    let harness = Harness::start(fast_config(0.1), vec![provider(), stranger.clone()]);
    harness.open_registered(&provider(), channel());
    harness.ledger.open_channel(&stranger, channel());

    harness.node_started();
    harness.wait_tracked(&provider()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let state = harness.state(&provider()).unwrap();
    assert!(state.registered);
    assert_eq!(state.balance(), 10_000);
    assert!(harness.state(&stranger).is_none());
    assert_eq!(harness.settler.tracked_identities(), vec![provider()]);
}

#[tokio::test]
async fn test_registration_event_starts_tracking() {
    let harness = Harness::start(fast_config(0.1), vec![]);
    harness.ledger.open_channel(&provider(), channel());

    harness.registered(&provider());
    harness.wait_tracked(&provider()).await;
    assert!(harness.state(&provider()).unwrap().registered);
}

#[tokio::test]
async fn test_promise_for_untracked_identity_is_ignored() {
    let harness = Harness::start(fast_config(0.1), vec![]);
    harness.ledger.open_channel(&provider(), channel());

    harness.promise(&provider(), 10_000);
    harness.wait_promises(1).await;

    assert!(harness.state(&provider()).is_none());
    assert_eq!(harness.settler.metrics().settlements_enqueued, 0);
}

// =========================================================================
// Threshold
// =========================================================================

#[tokio::test]
async fn test_promise_above_threshold_does_not_settle() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;

    harness.promise(&provider(), 8_999);
    harness.wait_promises(1).await;

    let state = harness.state(&provider()).unwrap();
    assert_eq!(state.last_promise.amount, 8_999);
    assert_eq!(state.balance(), 1_001);
    assert!(!state.settle_in_progress);
    assert_eq!(harness.settler.metrics().settlements_enqueued, 0);
    assert!(harness.history.list(&provider()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_threshold_crossing_settles_and_rebalances() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;

    harness.promise(&provider(), 9_000);
    harness.wait_settlements(1).await;
    harness.wait_idle(&provider()).await;

    let entries = harness.history.list(&provider()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, 9_000);
    assert_eq!(entries[0].kind, SettleKind::Settle);
    assert!(entries[0].tx_hash.is_some());

    let state = harness.state(&provider()).unwrap();
    assert_eq!(state.channel.settled, 9_000);
    assert_eq!(state.channel.balance, 10_000);
    assert_eq!(state.unsettled_balance(), 0);
    assert_eq!(state.balance(), 10_000);
}

#[tokio::test]
async fn test_settles_again_after_rebalance() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;

    harness.promise(&provider(), 9_000);
    harness.wait_settlements(1).await;
    harness.wait_idle(&provider()).await;

    // available is now 19_000: settles once 1_900 or less is left
    harness.promise(&provider(), 15_000);
    harness.wait_promises(2).await;
    assert_eq!(harness.settler.metrics().settlements_enqueued, 1);

    harness.promise(&provider(), 17_200);
    harness.wait_settlements(2).await;
    harness.wait_idle(&provider()).await;

    let amounts: Vec<u128> = harness
        .history
        .list(&provider())
        .await
        .unwrap()
        .iter()
        .map(|e| e.amount)
        .collect();
    assert_eq!(amounts, vec![9_000, 8_200]);
    assert_eq!(harness.state(&provider()).unwrap().channel.settled, 17_200);
}

#[tokio::test]
async fn test_identities_settle_independently() {
    let other = Identity::from_address("0xother");
    let harness = Harness::start(fast_config(0.1), vec![provider(), other.clone()]);
    harness.open_registered(&provider(), channel());
    harness.open_registered(&other, channel());
    harness.node_started();
    harness.wait_tracked(&provider()).await;
    harness.wait_tracked(&other).await;

    harness.promise(&provider(), 9_500);
    harness.promise(&other, 100);
    harness.wait_settlements(1).await;
    harness.wait_idle(&provider()).await;
    harness.wait_promises(2).await;

    assert_eq!(harness.history.list(&provider()).await.unwrap().len(), 1);
    assert!(harness.history.list(&other).await.unwrap().is_empty());
    assert_eq!(harness.state(&other).unwrap().last_promise.amount, 100);
}

// =========================================================================
// Retry
// =========================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;
    harness.ledger.fail_next_settlements(2);

    harness.promise(&provider(), 9_500);
    harness.wait_settlements(1).await;

    assert_eq!(harness.ledger.settlement_attempts(), 3);
    assert_eq!(harness.settler.metrics().settlements_succeeded, 1);
}

#[tokio::test]
async fn test_exhausted_settlement_retried_on_next_promise() {
    let mut config = fast_config(0.1);
    config.max_wait_for_settlement = Duration::from_millis(50);
    let harness = Harness::start(config, vec![provider()]);
    tracked_provider(&harness).await;
    harness.ledger.fail_next_settlements(u32::MAX);

    harness.promise(&provider(), 9_500);
    harness.wait_settlements(1).await;
    harness.wait_idle(&provider()).await;
    assert_eq!(harness.settler.metrics().settlements_failed, 1);
    assert!(harness.history.list(&provider()).await.unwrap().is_empty());

    harness.ledger.fail_next_settlements(0);
    harness.promise(&provider(), 9_600);
    harness.wait_settlements(2).await;

    let entries = harness.history.list(&provider()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].promise_amount, 9_600);
}

// =========================================================================
// Manual settlement
// =========================================================================

#[tokio::test]
async fn test_force_settle_below_threshold() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;
    harness.promise(&provider(), 100);
    harness.wait_promises(1).await;

    harness.settler.force_settle(&provider()).await.unwrap();
    harness.wait_settlements(1).await;

    let entries = harness.history.list(&provider()).await.unwrap();
    assert_eq!(entries[0].amount, 100);

    harness.wait_idle(&provider()).await;
    let err = harness.settler.force_settle(&provider()).await.unwrap_err();
    assert!(matches!(err, SettlementError::NothingToSettle(_)));
}

#[tokio::test]
async fn test_settle_into_stake() {
    let harness = Harness::start(fast_config(0.1), vec![provider()]);
    tracked_provider(&harness).await;
    harness.promise(&provider(), 2_000);
    harness.wait_promises(1).await;

    harness.settler.settle_into_stake(&provider()).await.unwrap();
    harness.wait_settlements(1).await;
    harness.wait_idle(&provider()).await;

    let state = harness.state(&provider()).unwrap();
    assert_eq!(state.channel.stake, 12_000);
    assert_eq!(state.channel.settled, 2_000);
    let entries = harness.history.list(&provider()).await.unwrap();
    assert_eq!(entries[0].kind, SettleKind::IntoStake);
}

#[tokio::test]
async fn test_force_settle_unregistered_identity() {
    let harness = Harness::start(fast_config(0.1), vec![]);
    harness.ledger.open_channel(&provider(), channel());
    let err = harness.settler.force_settle(&provider()).await.unwrap_err();
    assert!(matches!(err, SettlementError::NotRegistered(_)));
}

// =========================================================================
// Fees
// =========================================================================

#[tokio::test]
async fn test_fee_recorded_in_history() {
    let harness = Harness::start_with_ledger(fast_config(0.1), vec![provider()], InMemoryLedger::new(500));
    tracked_provider(&harness).await;

    harness.promise(&provider(), 9_000);
    harness.wait_settlements(1).await;

    let entries = harness.history.list(&provider()).await.unwrap();
    assert_eq!(entries[0].fees, Some(450));
}
