//! Lease-based advisory mutex over a storage area.
//!
//! Two live instances sharing one durable area must not both restore the
//! same persisted events. Each instance takes a short lease before
//! restoring: the lock record is `owner:expiry_ms` under a reserved key, a
//! write claims it, and ownership is confirmed after yielding once so a
//! racing claimant interleaved on the same executor loses exactly one of
//! the two confirmations. Advisory, not atomic: for backends without
//! compare-and-set the confirmation narrows the race window, it cannot
//! close it.

use std::sync::Arc;

use tracing::warn;

use crate::area::{StorageArea, RESERVED_PREFIX};

/// Default lease length.
pub const DEFAULT_LEASE_MS: i64 = 10_000;

fn wall_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One named lease slot in a storage area.
pub struct PageLock {
    storage: Arc<dyn StorageArea>,
    key: String,
    owner: String,
}

impl PageLock {
    /// Lock named `name`, claimed as `owner` (the instance's page id).
    #[must_use]
    pub fn new(name: &str, storage: Arc<dyn StorageArea>, owner: impl Into<String>) -> Self {
        Self {
            storage,
            key: format!("{RESERVED_PREFIX}mutex_{name}"),
            owner: owner.into(),
        }
    }

    /// Try to take the lease for `lease_ms`.
    ///
    /// Returns a guard that releases on drop, or `None` when another owner
    /// holds an unexpired lease or this claim lost its confirmation.
    pub async fn acquire(&self, lease_ms: i64) -> Option<LockGuard<'_>> {
        let now = wall_ms();
        if self.held_by_other(now) {
            return None;
        }
        let record = format!("{}:{}", self.owner, now + lease_ms);
        if let Err(error) = self.storage.set_item(&self.key, &record) {
            warn!(key = %self.key, %error, "lock claim write failed");
            return None;
        }
        // Give a racing claimant interleaved on this executor the chance to
        // overwrite the record before ownership is confirmed.
        tokio::task::yield_now().await;
        if self.holds(wall_ms()) {
            Some(LockGuard { lock: self })
        } else {
            None
        }
    }

    /// Whether another owner holds an unexpired lease at `now_ms`.
    #[must_use]
    pub fn held_by_other(&self, now_ms: i64) -> bool {
        match self.current() {
            Some((owner, expiry)) => owner != self.owner && expiry >= now_ms,
            None => false,
        }
    }

    fn holds(&self, now_ms: i64) -> bool {
        match self.current() {
            Some((owner, expiry)) => owner == self.owner && expiry >= now_ms,
            None => false,
        }
    }

    /// Parsed lock record. Malformed records read as absent, so a corrupt
    /// value never wedges the slot.
    fn current(&self) -> Option<(String, i64)> {
        let record = self.storage.get_item(&self.key).ok().flatten()?;
        let (owner, expiry) = record.split_once(':')?;
        let expiry = expiry.parse::<i64>().ok()?;
        Some((owner.to_owned(), expiry))
    }
}

impl std::fmt::Debug for PageLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Held lease. Releases the lock record on drop, but only while still the
/// recorded owner; an expired lease taken over by someone else is left
/// alone.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a PageLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.lock.holds(wall_ms()) {
            if let Err(error) = self.lock.storage.remove_item(&self.lock.key) {
                warn!(key = %self.lock.key, %error, "lock release failed");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
