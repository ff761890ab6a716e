//! Per-source-location mutual exclusion.
//!
//! Checkouts and generated entry points live at paths keyed only by source
//! location, so everything that touches them (cache-bust removal, the
//! existence check and clone, render and compile) runs under one lock per
//! source. Different sources never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// Registry of per-source locks.
///
/// Entries are dropped once no guard or waiter refers to them, so the map
/// only holds sources with work in flight.
#[derive(Default)]
pub(crate) struct SourceLocks {
    locks: Arc<StdMutex<LockMap>>,
}

/// Exclusive hold on one source location. Released on drop.
pub(crate) struct SourceGuard {
    source: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<StdMutex<LockMap>>,
}

fn lock_map(locks: &StdMutex<LockMap>) -> std::sync::MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|e| e.into_inner())
}

impl SourceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `source`.
    pub(crate) async fn acquire(&self, source: &str) -> SourceGuard {
        let lock = lock_map(&self.locks)
            .entry(source.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        SourceGuard {
            source: source.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of sources currently tracked.
    pub(crate) fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        // Release the mutex first so its Arc no longer counts as a holder.
        self.guard.take();
        let mut locks = lock_map(&self.locks);
        // Waiters clone the Arc under the map lock, so a count of one means
        // only the map refers to it.
        if locks
            .get(&self.source)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.source);
        }
    }
}
