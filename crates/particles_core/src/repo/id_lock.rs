//! Lock serializing particle ID allocation.
//!
//! # Responsibility
//! - Make `add_particle`'s read-`next_id`-then-write step indivisible with
//!   respect to every other `add_particle` on the same document.
//!
//! # Invariants
//! - `Global` mode serializes every allocation in the process.
//! - `Sharded` mode serializes allocations per document key; different
//!   documents proceed in parallel.
//! - The lock guards no data, so a poisoned mutex is recovered rather than
//!   reported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Allocation lock granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdLockMode {
    /// One lock for the whole process.
    #[default]
    Global,
    /// One lock per document key.
    Sharded,
}

#[derive(Debug)]
enum LockInner {
    Global(Mutex<()>),
    Sharded(Mutex<HashMap<String, Arc<Mutex<()>>>>),
}

/// Lock shared by every repository that allocates particle IDs.
///
/// Share one instance (behind `Arc`) across all connections to the same
/// database; separate instances do not exclude each other.
#[derive(Debug)]
pub struct IdAllocationLock {
    inner: LockInner,
}

impl IdAllocationLock {
    pub fn new(mode: IdLockMode) -> Self {
        let inner = match mode {
            IdLockMode::Global => LockInner::Global(Mutex::new(())),
            IdLockMode::Sharded => LockInner::Sharded(Mutex::new(HashMap::new())),
        };
        Self { inner }
    }

    pub fn global() -> Self {
        Self::new(IdLockMode::Global)
    }

    pub fn sharded() -> Self {
        Self::new(IdLockMode::Sharded)
    }

    pub fn mode(&self) -> IdLockMode {
        match self.inner {
            LockInner::Global(_) => IdLockMode::Global,
            LockInner::Sharded(_) => IdLockMode::Sharded,
        }
    }

    /// Runs `critical` while holding the lock that covers `doc_key`.
    pub fn run_exclusive<T>(&self, doc_key: &str, critical: impl FnOnce() -> T) -> T {
        match &self.inner {
            LockInner::Global(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                critical()
            }
            LockInner::Sharded(shards) => {
                let shard = {
                    let mut shards = shards.lock().unwrap_or_else(PoisonError::into_inner);
                    Arc::clone(shards.entry(doc_key.to_string()).or_default())
                };
                let _guard = shard.lock().unwrap_or_else(PoisonError::into_inner);
                critical()
            }
        }
    }

    /// Number of per-document shards created so far (0 in global mode).
    pub fn shard_count(&self) -> usize {
        match &self.inner {
            LockInner::Global(_) => 0,
            LockInner::Sharded(shards) => shards
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

impl Default for IdAllocationLock {
    fn default() -> Self {
        Self::global()
    }
}

#[cfg(test)]
mod tests {
    use super::{IdAllocationLock, IdLockMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sharded_lock_creates_one_shard_per_document() {
        let lock = IdAllocationLock::sharded();
        lock.run_exclusive("a/b/1", || ());
        lock.run_exclusive("a/b/2", || ());
        lock.run_exclusive("a/b/1", || ());
        assert_eq!(lock.shard_count(), 2);
        assert_eq!(lock.mode(), IdLockMode::Sharded);
    }

    #[test]
    fn global_lock_reports_no_shards() {
        let lock = IdAllocationLock::default();
        assert_eq!(lock.run_exclusive("a/b/1", || 7), 7);
        assert_eq!(lock.shard_count(), 0);
        assert_eq!(lock.mode(), IdLockMode::Global);
    }

    #[test]
    fn critical_sections_on_one_key_never_overlap() {
        for mode in [IdLockMode::Global, IdLockMode::Sharded] {
            let lock = Arc::new(IdAllocationLock::new(mode));
            let inside = Arc::new(AtomicUsize::new(0));
            let max_seen = Arc::new(AtomicUsize::new(0));

            thread::scope(|scope| {
                for _ in 0..8 {
                    let lock = Arc::clone(&lock);
                    let inside = Arc::clone(&inside);
                    let max_seen = Arc::clone(&max_seen);
                    scope.spawn(move || {
                        for _ in 0..50 {
                            lock.run_exclusive("owner/list/datum", || {
                                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                                max_seen.fetch_max(now, Ordering::SeqCst);
                                thread::yield_now();
                                inside.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                    });
                }
            });

            assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn panicking_critical_section_does_not_wedge_the_lock() {
        let lock = Arc::new(IdAllocationLock::global());
        let poisoner = Arc::clone(&lock);
        let result = thread::spawn(move || {
            poisoner.run_exclusive("k", || panic!("boom"));
        })
        .join();
        assert!(result.is_err());
        assert_eq!(lock.run_exclusive("k", || 1), 1);
    }
}
