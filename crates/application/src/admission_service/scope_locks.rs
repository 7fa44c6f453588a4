use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use runguard_domain::ScopeKey;

/// Prune idle entries once the registry grows past this many keys.
const PRUNE_THRESHOLD: usize = 1_024;

/// Registry of per-scope-key mutexes serializing evaluate-and-reserve.
///
/// Unrelated scope keys never contend. Entries are held weakly and pruned
/// once no guard or waiter references them.
#[derive(Default)]
pub(super) struct ScopeLocks {
    locks: Mutex<HashMap<ScopeKey, Weak<Mutex<()>>>>,
}

/// Guards for a set of scope keys, released together on drop.
pub(super) struct ScopeGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ScopeLocks {
    /// Locks every key in ascending order. Duplicates are locked once.
    pub(super) async fn lock_all(&self, keys: &[ScopeKey]) -> ScopeGuards {
        let mut ordered = keys.iter().collect::<Vec<_>>();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let lock = self.lock_for(key).await;
            guards.push(lock.lock_owned().await);
            debug!(scope_key = %key, "scope lock acquired");
        }

        ScopeGuards { _guards: guards }
    }

    async fn lock_for(&self, key: &ScopeKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;

        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, lock| lock.strong_count() > 0);
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    pub(super) async fn tracked_keys(&self) -> usize {
        self.locks.lock().await.len()
    }
}
