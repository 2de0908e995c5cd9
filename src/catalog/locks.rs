//! Per-natural-key write locks.
//!
//! Movie enrichment and episode reconciliation read candidates and then
//! insert or update. Two workers resolving the same natural key with
//! different descriptive fields would both see no candidate and both insert,
//! and no unique index can catch that because their rows differ. Holding the
//! key's lock across the read-check-write closes that window whether or not
//! the lookup cache is enabled.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async locks keyed by natural-key strings.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    // Arc lets callers drop the DashMap shard guard before awaiting the lock.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Waits for exclusive use of `key`; released when the guard drops.
    pub(crate) async fn acquire(&self, key: String) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(key).or_default().value());
        lock.lock_owned().await
    }
}
