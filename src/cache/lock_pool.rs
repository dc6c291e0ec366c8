//! Fine-grained per-key locking.
//!
//! A lock pool hands out mutual exclusion per key without allocating a
//! mutex per key: a set of currently-locked keys plus one condvar. Used to
//! guard the handoff window between cache eviction and external access,
//! and to serialize blob loads per blob id.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Set-of-locked-keys lock pool.
pub struct LockPool<K> {
    locked: Mutex<HashSet<K>>,
    cond: Condvar,
}

/// Guard for one locked key; unlocks on drop.
pub struct PoolGuard<'a, K: Eq + Hash + Clone> {
    pool: &'a LockPool<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> LockPool<K> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(HashSet::new()),
            cond: Condvar::new(),
        }
    }

    /// Lock `key`, blocking while another guard for it is alive.
    ///
    /// Safe to call while holding an outer mutex only if every current
    /// holder of `key` can release it without taking that outer mutex.
    pub fn lock(&self, key: K) -> PoolGuard<'_, K> {
        let mut locked = self.locked.lock();
        while locked.contains(&key) {
            self.cond.wait(&mut locked);
        }
        locked.insert(key.clone());
        PoolGuard { pool: self, key }
    }

    /// Lock `key`, releasing `outer` while waiting.
    ///
    /// If `key` is free, `outer` is kept locked the whole time. Otherwise
    /// `outer` is released, the call waits for `key`, registers it, and
    /// only then re-acquires `outer` (after the pool's internal lock is
    /// dropped, so a holder of `outer` can still enter the pool).
    pub fn lock_releasing<'m, T>(
        &self,
        key: K,
        outer_mutex: &'m Mutex<T>,
        outer: MutexGuard<'m, T>,
    ) -> (PoolGuard<'_, K>, MutexGuard<'m, T>) {
        let mut locked = self.locked.lock();
        if !locked.contains(&key) {
            locked.insert(key.clone());
            drop(locked);
            return (PoolGuard { pool: self, key }, outer);
        }
        drop(outer);
        while locked.contains(&key) {
            self.cond.wait(&mut locked);
        }
        locked.insert(key.clone());
        drop(locked);
        let outer = outer_mutex.lock();
        (PoolGuard { pool: self, key }, outer)
    }

    /// Like [`LockPool::lock`], but the guard keeps the pool alive instead
    /// of borrowing it, so it can be stored in longer-lived objects.
    pub fn lock_owned(self: &Arc<Self>, key: K) -> OwnedPoolGuard<K> {
        let mut locked = self.locked.lock();
        while locked.contains(&key) {
            self.cond.wait(&mut locked);
        }
        locked.insert(key.clone());
        drop(locked);
        OwnedPoolGuard {
            pool: Arc::clone(self),
            key,
        }
    }

    fn release(&self, key: &K) {
        let mut locked = self.locked.lock();
        let was_locked = locked.remove(key);
        debug_assert!(was_locked, "released a key that was not locked");
        drop(locked);
        self.cond.notify_all();
    }
}

/// Guard for one locked key, keeping the pool alive; unlocks on drop.
pub struct OwnedPoolGuard<K: Eq + Hash + Clone> {
    pool: Arc<LockPool<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for OwnedPoolGuard<K> {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}

impl<K: Eq + Hash + Clone> Default for LockPool<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Drop for PoolGuard<'_, K> {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn different_keys_do_not_block() {
        let pool = LockPool::new();
        let _a = pool.lock(1);
        let _b = pool.lock(2);
    }

    #[test]
    fn relock_after_release() {
        let pool = LockPool::new();
        let guard = pool.lock(1);
        drop(guard);
        let _again = pool.lock(1);
    }

    #[test]
    fn same_key_blocks_until_released() {
        let pool = Arc::new(LockPool::new());
        let released = Arc::new(AtomicBool::new(false));
        let guard = pool.lock(7u32);

        let handle = {
            let pool = Arc::clone(&pool);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _g = pool.lock(7u32);
                assert!(released.load(Ordering::SeqCst), "lock acquired too early");
            })
        };

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn lock_releasing_frees_outer_mutex_while_waiting() {
        let pool = Arc::new(LockPool::new());
        let outer: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let key_guard = pool.lock(1u32);

        let handle = {
            let pool = Arc::clone(&pool);
            let outer = Arc::clone(&outer);
            thread::spawn(move || {
                let guard = outer.lock();
                // Waits for key 1; must release `outer` meanwhile.
                let (_k, mut outer_guard) = pool.lock_releasing(1u32, &*outer, guard);
                *outer_guard += 1;
            })
        };

        thread::sleep(Duration::from_millis(50));
        {
            // The waiter must have released the outer mutex by now.
            let _must_not_block = outer
                .try_lock_for(Duration::from_secs(1))
                .expect("outer mutex still held");
        }
        drop(key_guard);
        handle.join().unwrap();
        assert_eq!(*outer.lock(), 1);
    }
}
