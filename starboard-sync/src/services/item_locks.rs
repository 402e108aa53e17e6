//! Per-origin mutual exclusion
//!
//! Locks are created on first use and dropped from the map once the last holder
//! or waiter lets go, so the map only holds entries for items under contention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::MessageId;

#[derive(Default)]
pub struct ItemLocks {
    locks: StdMutex<HashMap<MessageId, Arc<Mutex<()>>>>,
}

/// Held while one origin's read-modify-write sequence runs
pub struct ItemGuard<'a> {
    owner: &'a ItemLocks,
    origin_id: MessageId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, origin_id: MessageId) -> ItemGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(origin_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ItemGuard {
            owner: self,
            origin_id,
            guard: Some(guard),
        }
    }

    /// Number of origins with a live lock handle
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for ItemGuard<'_> {
    fn drop(&mut self) {
        // release before inspecting the count so our own guard is not counted
        self.guard.take();
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        let uncontended = locks
            .get(&self.origin_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if uncontended {
            locks.remove(&self.origin_id);
        }
    }
}
