//! Allocation locking.
//!
//! An allocation holds a lock for every NetworkAttachmentDefinition it is
//! about to render, from the ownership check until the object's annotations
//! are written. Two allocations touching the same network never interleave,
//! so the store never sees two creates for one key. Allocations touching
//! disjoint networks run concurrently unless [`LockScope::Global`] is used.
//!
//! Keys are always acquired in sorted order, which rules out deadlock
//! between requests that share more than one network.

use crate::error::IpManagerError;
use crate::reconciler::NetworkKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Granularity of allocation locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// One lock per network key
    #[default]
    Network,
    /// A single process-wide lock
    Global,
}

impl std::str::FromStr for LockScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "network" => Ok(LockScope::Network),
            "global" => Ok(LockScope::Global),
            other => Err(format!("unknown lock scope '{}', expected 'network' or 'global'", other)),
        }
    }
}

/// Keyed allocation locks.
///
/// Entries are held weakly, so locks nobody holds or waits for are dropped
/// and pruned on the next acquisition.
#[derive(Debug)]
pub struct AllocationLocks {
    scope: LockScope,
    timeout: Duration,
    locks: Mutex<HashMap<NetworkKey, Weak<AsyncMutex<()>>>>,
}

/// Held allocation locks; released when dropped.
#[derive(Debug)]
pub struct AllocationGuard {
    keys: Vec<NetworkKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AllocationGuard {
    /// Keys this guard holds, in acquisition order
    pub fn keys(&self) -> &[NetworkKey] {
        &self.keys
    }
}

fn global_key() -> NetworkKey {
    NetworkKey::new("", "*")
}

impl AllocationLocks {
    /// Creates a lock table. `timeout` bounds the total wait in [`acquire`](Self::acquire).
    pub fn new(scope: LockScope, timeout: Duration) -> Self {
        Self {
            scope,
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Scope the table was created with.
    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Number of live lock entries
    pub fn len(&self) -> usize {
        self.table().values().filter(|lock| lock.strong_count() > 0).count()
    }

    /// Returns true if no lock is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<NetworkKey, Weak<AsyncMutex<()>>>> {
        // Entries are weak pointers only, so a poisoned table is still valid
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, key: &NetworkKey) -> Arc<AsyncMutex<()>> {
        let mut table = self.table();
        if let Some(lock) = table.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        table.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        table.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Acquires the locks for `keys`.
    ///
    /// Fails with [`IpManagerError::LockTimeout`] if they cannot all be held
    /// within the configured timeout; locks taken so far are released.
    pub async fn acquire(
        &self,
        keys: impl IntoIterator<Item = NetworkKey>,
    ) -> Result<AllocationGuard, IpManagerError> {
        let keys: Vec<NetworkKey> = match self.scope {
            LockScope::Global => vec![global_key()],
            LockScope::Network => keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
        };

        let locks: Vec<Arc<AsyncMutex<()>>> = keys.iter().map(|key| self.lock_for(key)).collect();

        let acquire_all = async move {
            let mut guards = Vec::with_capacity(locks.len());
            for lock in locks {
                guards.push(lock.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(self.timeout, acquire_all).await {
            Ok(guards) => {
                debug!("Acquired allocation locks for {} network(s)", keys.len());
                Ok(AllocationGuard {
                    keys,
                    _guards: guards,
                })
            }
            Err(_) => {
                let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
                warn!("Timed out after {:?} waiting for allocation locks {:?}", self.timeout, names);
                Err(IpManagerError::LockTimeout(names.join(", ")))
            }
        }
    }
}
