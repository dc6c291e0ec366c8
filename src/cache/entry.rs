//! Cache entry bookkeeping: a value plus the time it entered the cache.

use std::time::{Duration, Instant};

/// A cached value and its last-push timestamp.
///
/// The age is measured from the moment the entry was (re-)pushed into the
/// cache, not from its last external access; popping and pushing an entry
/// back resets it.
pub struct CacheEntry<V> {
    last_push: Instant,
    value: V,
}

impl<V> CacheEntry<V> {
    /// Wrap a value, stamping it with the current time.
    pub fn new(value: V) -> Self {
        Self {
            last_push: Instant::now(),
            value,
        }
    }

    /// Time since the entry entered the cache.
    #[inline]
    pub fn age(&self) -> Duration {
        self.last_push.elapsed()
    }

    /// Borrow the value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Unwrap the value.
    pub fn into_value(self) -> V {
        self.value
    }
}
