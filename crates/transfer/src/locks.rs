use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

/// Per-hash async locks.
///
/// Entries are held weakly: a lock lives as long as some task holds or waits
/// on it, and dead entries are pruned on the next acquisition. Different
/// hashes never contend.
#[derive(Debug, Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

/// Guard returned by [`SessionLocks::lock`]; the session is released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds the lock for `hash`.
    pub async fn lock(&self, hash: &str) -> SessionGuard {
        let mutex = self.entry(hash);
        SessionGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, w| w.strong_count() > 0);

        if let Some(existing) = map.get(hash).and_then(Weak::upgrade) {
            return existing;
        }
        let mutex = Arc::new(tokio::sync::Mutex::new(()));
        map.insert(hash.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}
