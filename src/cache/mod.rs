//! Keyed write-back cache with bounded size and timed purging.
//!
//! The cache is a queue-ordered map of entries plus a per-key lock pool.
//! Eviction (making space on push, the periodic purge, flush, drop) always
//! follows the same protocol:
//!
//! 1. take the map mutex, peek the head key,
//! 2. take that key's pool lock (holders never need the map mutex to
//!    finish, so blocking here is fine),
//! 3. pop the head entry, release the map mutex,
//! 4. drop the value — write-back side effects run in the value's `Drop`,
//!    outside the map mutex, so other keys stay usable meanwhile,
//! 5. release the pool lock.
//!
//! A concurrent `pop` of the key being evicted waits on the pool lock
//! (releasing the map mutex while waiting), so it can only conclude
//! "not in cache" after the write-back finished. That closes the window in
//! which a block would be in neither the cache nor the backend.

pub mod entry;
pub mod lock_pool;
pub mod periodic;
pub mod queue_map;

use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use entry::CacheEntry;
use lock_pool::LockPool;
use periodic::PeriodicTask;
use queue_map::QueueMap;

// ============================================================================
// Constants
// ============================================================================

/// Age at which the purge task evicts an entry.
pub const PURGE_LIFETIME: Duration = Duration::from_millis(500);

/// Interval of the purge task.
pub const PURGE_INTERVAL: Duration = Duration::from_millis(500);

/// Oldest age an entry can reach if purging ran ideally.
pub const MAX_LIFETIME: Duration = Duration::from_millis(1000);

// ============================================================================
// Cache
// ============================================================================

/// Bounded write-back cache. Values carry their own write-back logic in
/// `Drop`; evicting an entry simply drops it outside the map mutex.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    inner: Arc<CacheInner<K, V>>,
    purge_task: Option<PeriodicTask>,
}

struct CacheInner<K, V> {
    entries: Mutex<QueueMap<K, CacheEntry<V>>>,
    evicting: LockPool<K>,
    max_entries: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a cache holding at most `max_entries` entries, purging
    /// entries older than `purge_lifetime` every `purge_interval`.
    pub fn new(
        name: &str,
        max_entries: usize,
        purge_lifetime: Duration,
        purge_interval: Duration,
    ) -> Self {
        assert!(max_entries > 0, "cache needs capacity for at least one entry");
        let inner = Arc::new(CacheInner {
            entries: Mutex::new(QueueMap::new()),
            evicting: LockPool::new(),
            max_entries,
        });
        let weak = Arc::downgrade(&inner);
        let purge_task = PeriodicTask::spawn(&format!("purge-{name}"), purge_interval, move || {
            if let Some(inner) = weak.upgrade() {
                CacheInner::evict_matching_parallel(&inner, move |entry: &CacheEntry<V>| {
                    entry.age() > purge_lifetime
                });
            }
        });
        Self {
            inner,
            purge_task: Some(purge_task),
        }
    }

    /// Insert an entry, evicting from the head until there is space.
    pub fn push(&self, key: K, value: V) {
        let mut guard = self.inner.entries.lock();
        while guard.len() >= self.inner.max_entries {
            // Eviction releases the map mutex while the value drops; by the
            // time we hold it again someone may have filled the cache back
            // up, hence the loop.
            guard = CacheInner::evict_head_and_relock(&self.inner, guard);
        }
        guard.push(key, CacheEntry::new(value));
    }

    /// Remove and return the entry stored under `key`.
    ///
    /// If the key is currently being evicted, waits until the eviction
    /// (including its write-back) finished and then reports a miss.
    pub fn pop(&self, key: &K) -> Option<V> {
        let guard = self.inner.entries.lock();
        let (_key_lock, mut guard) =
            self.inner
                .evicting
                .lock_releasing(key.clone(), &self.inner.entries, guard);
        guard.pop(key).map(CacheEntry::into_value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Is the cache empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every entry, running all write-backs.
    pub fn flush(&self) {
        CacheInner::evict_matching_parallel(&self.inner, |_: &CacheEntry<V>| true);
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        // Stop and join the purge task before the final flush so no
        // concurrent purge interleaves with teardown.
        self.purge_task.take();
        CacheInner::evict_matching_parallel(&self.inner, |_: &CacheEntry<V>| true);
        debug_assert!(self.inner.entries.lock().is_empty());
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Evict matching entries from the head until the head stops matching,
    /// fanning out to worker threads so write-backs overlap.
    fn evict_matching_parallel<F>(inner: &Arc<Self>, matches: F)
    where
        F: Fn(&CacheEntry<V>) -> bool + Sync,
    {
        // Twice the cores: half the workers may be blocked on I/O.
        let workers = 2 * thread::available_parallelism().map_or(1, usize::from);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| while Self::evict_head_if(inner, &matches) {});
            }
        });
    }

    /// Evict the head entry if it matches. Returns false when the cache is
    /// empty or the head does not match.
    fn evict_head_if<F>(inner: &Self, matches: &F) -> bool
    where
        F: Fn(&CacheEntry<V>) -> bool,
    {
        let guard = inner.entries.lock();
        let key = match guard.peek() {
            Some(entry) if matches(entry) => guard.peek_key().expect("peek succeeded").clone(),
            _ => return false,
        };
        Self::evict(inner, guard, key);
        true
    }

    /// Evict the head entry and re-acquire the map mutex.
    fn evict_head_and_relock<'a>(
        inner: &'a Self,
        guard: MutexGuard<'a, QueueMap<K, CacheEntry<V>>>,
    ) -> MutexGuard<'a, QueueMap<K, CacheEntry<V>>> {
        let key = guard.peek_key().expect("full cache has a head entry").clone();
        Self::evict(inner, guard, key);
        inner.entries.lock()
    }

    /// Steps 2–5 of the eviction protocol; `key` must be the head key and
    /// `guard` must have been held since it was peeked.
    fn evict(inner: &Self, mut guard: MutexGuard<'_, QueueMap<K, CacheEntry<V>>>, key: K) {
        let key_lock = inner.evicting.lock(key);
        let value = guard.pop_front();
        drop(guard);
        drop(value); // write-back runs here, outside the map mutex
        drop(key_lock);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Value whose drop records itself, optionally slowly.
    struct DropProbe {
        id: u32,
        dropped: Arc<Mutex<Vec<u32>>>,
        delay: Duration,
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            thread::sleep(self.delay);
            self.dropped.lock().push(self.id);
        }
    }

    fn probe(id: u32, dropped: &Arc<Mutex<Vec<u32>>>) -> DropProbe {
        DropProbe {
            id,
            dropped: Arc::clone(dropped),
            delay: Duration::ZERO,
        }
    }

    fn test_cache(max_entries: usize) -> Cache<u32, DropProbe> {
        // Long purge lifetime so tests control eviction themselves.
        Cache::new(
            "test",
            max_entries,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn push_and_pop() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let cache = test_cache(10);
        cache.push(1, probe(101, &dropped));
        cache.push(2, probe(102, &dropped));
        assert_eq!(cache.pop(&1).map(|v| v.id), Some(101));
        assert_eq!(cache.pop(&2).map(|v| v.id), Some(102));
        assert!(cache.pop(&3).is_none());
    }

    #[test]
    fn eviction_at_capacity_drops_oldest() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let cache = test_cache(3);
        for i in 1..=3 {
            cache.push(i, probe(100 + i, &dropped));
        }
        cache.push(4, probe(104, &dropped));
        assert_eq!(*dropped.lock(), vec![101]);
        assert_eq!(cache.len(), 3);
        assert!(cache.pop(&1).is_none());
    }

    #[test]
    fn flush_evicts_everything() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let cache = test_cache(10);
        for i in 1..=5 {
            cache.push(i, probe(i, &dropped));
        }
        cache.flush();
        assert!(cache.is_empty());
        let mut ids = dropped.lock().clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn drop_flushes_remaining_entries() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let cache = test_cache(10);
        cache.push(1, probe(1, &dropped));
        drop(cache);
        assert_eq!(*dropped.lock(), vec![1]);
    }

    #[test]
    fn purge_task_evicts_old_entries() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let cache: Cache<u32, DropProbe> = Cache::new(
            "purge-test",
            10,
            Duration::from_millis(20),
            Duration::from_millis(10),
        );
        cache.push(1, probe(1, &dropped));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.len() > 0 {
            assert!(std::time::Instant::now() < deadline, "entry never purged");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*dropped.lock(), vec![1]);
    }

    #[test]
    fn pop_waits_for_in_flight_eviction() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let drop_finished = Arc::new(AtomicBool::new(false));
        let cache = Arc::new(test_cache(10));

        cache.push(
            1,
            DropProbe {
                id: 1,
                dropped: Arc::clone(&dropped),
                delay: Duration::from_millis(200),
            },
        );

        let flusher = {
            let cache = Arc::clone(&cache);
            let drop_finished = Arc::clone(&drop_finished);
            thread::spawn(move || {
                cache.flush();
                drop_finished.store(true, Ordering::SeqCst);
            })
        };

        // Let the flusher enter the slow drop, then race a pop against it.
        thread::sleep(Duration::from_millis(50));
        let result = cache.pop(&1);
        assert!(result.is_none());
        // The pop may only conclude "miss" after the eviction finished.
        assert_eq!(*dropped.lock(), vec![1]);
        flusher.join().unwrap();
        assert!(drop_finished.load(Ordering::SeqCst));
    }
}
