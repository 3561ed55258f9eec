//! Bounded LRU map with an eviction callback.
//!
//! Uses a monotonic counter to track access times. Entries with the
//! oldest access time are evicted first when the map is full, and every
//! value leaving the map through eviction or [`clear`](LruMap::clear) is
//! handed to the cleanup callback exactly once.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Callback run on every evicted or cleared entry.
pub type Cleanup<K, V> = Box<dyn FnMut(&K, V) + Send>;

/// A map holding at most `max_size` entries.
///
/// Each call to [`set`](LruMap::set) or [`get`](LruMap::get) records the
/// current time and increments the counter. When a new key does not fit,
/// the entry with the smallest access time is evicted.
pub struct LruMap<K, V> {
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    current_time: u64,
    max_size: usize,
    cleanup: Cleanup<K, V>,
    cleanup_count: u64,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty map. A `max_size` of zero is treated as one.
    pub fn new(max_size: usize, cleanup: impl FnMut(&K, V) + Send + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            current_time: 0,
            max_size: max_size.max(1),
            cleanup: Box::new(cleanup),
            cleanup_count: 0,
        }
    }

    /// Replace the cleanup callback. Applies to later evictions only.
    pub fn set_cleanup(&mut self, cleanup: impl FnMut(&K, V) + Send + 'static) {
        self.cleanup = Box::new(cleanup);
    }

    /// Insert `value` for `key`, making it the most recently used.
    ///
    /// Replacing a different value runs the cleanup on the old one. Inserting
    /// a new key into a full map evicts the least recently used entry first.
    pub fn set(&mut self, key: K, value: V)
    where
        V: PartialEq,
    {
        let time = self.tick();

        if let Some((old_value, old_time)) = self.entries.remove(&key) {
            self.order.remove(&old_time);
            self.order.insert(time, key.clone());
            if old_value == value {
                self.entries.insert(key, (old_value, time));
            } else {
                self.run_cleanup(&key, old_value);
                self.entries.insert(key, (value, time));
            }
            return;
        }

        if self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.order.insert(time, key.clone());
        self.entries.insert(key, (value, time));
    }

    /// Get the value for `key` and mark it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        let time = self.tick();
        let (value, access_time) = self.entries.get_mut(key)?;
        let owned_key = self.order.remove(&*access_time)?;
        *access_time = time;
        self.order.insert(time, owned_key);
        Some(value)
    }

    /// Borrow the value for `key` without touching the LRU order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Whether `key` is resident.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Take `key` out of the map. The cleanup is not run; the caller owns the value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, time) = self.entries.remove(key)?;
        self.order.remove(&time);
        Some(value)
    }

    /// Run the cleanup on every entry and empty the map.
    pub fn clear(&mut self) {
        let order = std::mem::take(&mut self.order);
        for key in order.into_values() {
            if let Some((value, _)) = self.entries.remove(&key) {
                self.run_cleanup(&key, value);
            }
        }
        self.entries.clear();
        self.current_time = 0;
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Number of cleanup runs since creation. Not reset by [`clear`](Self::clear).
    pub fn cleanup_count(&self) -> u64 {
        self.cleanup_count
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.values()
    }

    fn tick(&mut self) -> u64 {
        self.current_time += 1;
        self.current_time
    }

    fn run_cleanup(&mut self, key: &K, value: V) {
        self.cleanup_count += 1;
        (self.cleanup)(key, value);
    }

    fn evict_lru(&mut self) {
        let Some((_, key)) = self.order.pop_first() else {
            return;
        };
        if let Some((value, _)) = self.entries.remove(&key) {
            self.run_cleanup(&key, value);
        }
    }
}

impl<K, V> fmt::Debug for LruMap<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruMap")
            .field("keys", &self.order.values().collect::<Vec<_>>())
            .field("max_size", &self.max_size)
            .finish()
    }
}
