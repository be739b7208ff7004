//! Per-resource admission control.
//!
//! [`LockManager`] maps a [`LockKey`] to the id of the job or run holding
//! it. Acquisition never waits: a held key fails immediately with
//! `LOCK_CONFLICT` naming the holder. Every grant carries a unique number
//! so a [`LockGuard`] dropped late can never free a key that has since
//! been granted to someone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::lock_key::LockKey;

#[derive(Debug, Clone)]
struct Grant {
    holder: String,
    grant: u64,
}

type LockTable = Arc<Mutex<HashMap<LockKey, Grant>>>;

fn lock_table(table: &Mutex<HashMap<LockKey, Grant>>) -> MutexGuard<'_, HashMap<LockKey, Grant>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct LockManager {
    table: LockTable,
    next_grant: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `holder_id`, or fail with the current holder.
    pub fn acquire(&self, key: &LockKey, holder_id: impl Into<String>) -> CoreResult<LockGuard> {
        let holder_id = holder_id.into();
        let mut table = lock_table(&self.table);

        if let Some(active) = table.get(key) {
            tracing::info!(
                lock_key = %key,
                active_id = %active.holder,
                requested_by = %holder_id,
                "Lock conflict",
            );
            return Err(CoreError::LockConflict {
                lock_key: key.to_string(),
                active_id: active.holder.clone(),
            });
        }

        let grant = self.next_grant.fetch_add(1, Ordering::Relaxed) + 1;
        table.insert(
            key.clone(),
            Grant {
                holder: holder_id.clone(),
                grant,
            },
        );
        tracing::debug!(lock_key = %key, holder_id = %holder_id, "Lock acquired");

        Ok(LockGuard {
            key: key.clone(),
            holder_id,
            grant,
            table: Arc::clone(&self.table),
            released: false,
        })
    }

    /// Free `key` regardless of who holds it. Idempotent.
    pub fn release(&self, key: &LockKey) -> bool {
        let removed = lock_table(&self.table).remove(key);
        if let Some(grant) = &removed {
            tracing::debug!(lock_key = %key, holder_id = %grant.holder, "Lock force-released");
        }
        removed.is_some()
    }

    /// Id of the job or run currently holding `key`.
    pub fn holder(&self, key: &LockKey) -> Option<String> {
        lock_table(&self.table).get(key).map(|g| g.holder.clone())
    }

    pub fn active_count(&self) -> usize {
        lock_table(&self.table).len()
    }
}

/// Proof of a held key. Releases on drop, including unwinds.
#[derive(Debug)]
pub struct LockGuard {
    key: LockKey,
    holder_id: String,
    grant: u64,
    table: LockTable,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Release now. Returns `false` if the key had already been freed or
    /// re-granted.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        let mut table = lock_table(&self.table);
        match table.get(&self.key) {
            Some(current) if current.grant == self.grant => {
                table.remove(&self.key);
                tracing::debug!(lock_key = %self.key, holder_id = %self.holder_id, "Lock released");
                true
            }
            _ => false,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
