//! Per-identity settlement state and the table holding it.
//!
//! The table is guarded by a single lock. Every method takes and releases the
//! lock internally, so callers can never hold it across an `.await`.

use hermes_core::{ChannelSnapshot, Identity, Promise};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::SettlementError;

/// Financial snapshot of one identity.
///
/// Balances are derived on read from the channel and the last promise, so
/// `balance() + last_promise.amount == available_balance()` cannot drift.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SettlementState {
    pub channel: ChannelSnapshot,
    pub last_promise: Promise,
    pub registered: bool,
    pub settle_in_progress: bool,
}

impl SettlementState {
    /// Everything the hermes has made available to the channel.
    pub fn available_balance(&self) -> u128 {
        self.channel.balance.saturating_add(self.channel.settled)
    }

    /// What is left to earn before the channel runs dry.
    pub fn balance(&self) -> u128 {
        self.available_balance()
            .saturating_sub(self.last_promise.amount)
    }

    /// Promised but not yet settled.
    pub fn unsettled_balance(&self) -> u128 {
        self.last_promise
            .amount
            .saturating_sub(self.channel.settled)
    }

    /// Whether a settlement should be submitted now.
    ///
    /// The boundary is inclusive: a balance of exactly `threshold` of the
    /// available balance settles.
    pub fn needs_settling(&self, threshold: Threshold) -> bool {
        if !self.registered || self.settle_in_progress {
            return false;
        }
        threshold.is_reached(self.balance(), self.available_balance())
    }
}

/// Settlement threshold held as an exact ratio in parts per billion.
///
/// Comparisons are done on integers so the boundary stays exact for any
/// `u128` amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Threshold {
    ppb: u64,
}

impl Threshold {
    pub const SCALE: u64 = 1_000_000_000;

    /// Convert a fraction in [0, 1]; out of range values are clamped.
    pub fn from_fraction(fraction: f64) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        Self {
            ppb: (fraction * Self::SCALE as f64).round() as u64,
        }
    }

    pub fn parts_per_billion(&self) -> u64 {
        self.ppb
    }

    /// `balance <= fraction * available`, inclusive.
    pub fn is_reached(&self, balance: u128, available: u128) -> bool {
        mul_wide(balance, Self::SCALE) <= mul_wide(available, self.ppb)
    }
}

/// Full 256-bit product of `a * b` as `(high, low)` words.
fn mul_wide(a: u128, b: u64) -> (u128, u128) {
    let b = b as u128;
    let lo_part = (a & u64::MAX as u128) * b;
    let hi_part = (a >> 64) * b;
    let (low, carry) = lo_part.overflowing_add(hi_part << 64);
    let high = (hi_part >> 64) + carry as u128;
    (high, low)
}

/// Outcome of applying a received promise to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseUpdate {
    /// The identity is not tracked; nothing changed.
    Untracked,
    /// The promise is lower than the one already held; nothing changed.
    Stale { current: u128 },
    /// The promise was stored. When `settle` is set the in-progress flag was
    /// raised and the caller owns enqueueing the settlement.
    Applied { settle: bool, balance: u128 },
}

/// Identity → [`SettlementState`] map behind one lock.
#[derive(Debug, Default)]
pub struct SettlementTable {
    states: Mutex<HashMap<Identity, SettlementState>>,
}

impl SettlementTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, SettlementState>> {
        // every mutation is a single assignment, so a poisoned map is still consistent
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, identity: &Identity) -> Option<SettlementState> {
        self.lock().get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.lock().contains_key(identity)
    }

    /// Insert or overwrite an entry as-is.
    pub fn insert(&self, identity: Identity, state: SettlementState) {
        self.lock().insert(identity, state);
    }

    /// Replace the snapshot after a resync, marking the identity registered.
    ///
    /// The in-progress flag of an existing entry survives.
    pub fn replace_snapshot(
        &self,
        identity: &Identity,
        channel: ChannelSnapshot,
        last_promise: Promise,
    ) -> SettlementState {
        let mut states = self.lock();
        let settle_in_progress = states
            .get(identity)
            .map(|s| s.settle_in_progress)
            .unwrap_or(false);
        let state = SettlementState {
            channel,
            last_promise,
            registered: true,
            settle_in_progress,
        };
        states.insert(identity.clone(), state.clone());
        state
    }

    /// Store a newly received promise and evaluate the threshold.
    pub fn apply_promise(
        &self,
        identity: &Identity,
        promise: Promise,
        threshold: Threshold,
    ) -> PromiseUpdate {
        let mut states = self.lock();
        let Some(state) = states.get_mut(identity) else {
            return PromiseUpdate::Untracked;
        };
        if promise.amount < state.last_promise.amount {
            return PromiseUpdate::Stale {
                current: state.last_promise.amount,
            };
        }

        state.last_promise = promise;
        let settle = state.needs_settling(threshold);
        if settle {
            state.settle_in_progress = true;
        }
        PromiseUpdate::Applied {
            settle,
            balance: state.balance(),
        }
    }

    /// Claim the in-progress flag for a settlement requested outside the
    /// threshold policy. Returns the promise to settle.
    pub fn begin_settlement(&self, identity: &Identity) -> Result<Promise, SettlementError> {
        let mut states = self.lock();
        let state = states
            .get_mut(identity)
            .filter(|s| s.registered)
            .ok_or_else(|| SettlementError::NotRegistered(identity.clone()))?;
        if state.settle_in_progress {
            return Err(SettlementError::SettleInProgress(identity.clone()));
        }
        if state.unsettled_balance() == 0 {
            return Err(SettlementError::NothingToSettle(identity.clone()));
        }
        state.settle_in_progress = true;
        Ok(state.last_promise.clone())
    }

    pub fn set_settle_in_progress(&self, identity: &Identity, in_progress: bool) {
        if let Some(state) = self.lock().get_mut(identity) {
            state.settle_in_progress = in_progress;
        }
    }

    pub fn identities(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
