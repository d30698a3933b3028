//! Bounded least-recently-used cache

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Fixed-capacity map evicting the least recently used entry.
///
/// Both `get` and `insert` count as a use. Eviction scans for the oldest
/// entry, which is fine for the small capacities used here.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    clock: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::with_capacity(capacity.max(1)),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.tick();
        let (value, used) = self.entries.get_mut(key)?;
        *used = now;
        Some(value.clone())
    }

    /// Insert, evicting the least recently used entry when full. Returns the
    /// evicted key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            *entry = (value, now);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone());
            if let Some(key) = &oldest {
                self.entries.remove(key);
            }
            oldest
        } else {
            None
        };

        self.entries.insert(key, (value, now));
        evicted
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Number of artwork images kept in memory
pub const ARTWORK_CACHE_CAPACITY: usize = 100;

/// Shared artwork bytes keyed by app id
#[derive(Debug, Clone)]
pub struct ArtworkCache {
    inner: Arc<Mutex<LruCache<String, Arc<[u8]>>>>,
}

impl Default for ArtworkCache {
    fn default() -> Self {
        Self::with_capacity(ARTWORK_CACHE_CAPACITY)
    }
}

impl ArtworkCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn get(&self, app_id: &str) -> Option<Arc<[u8]>> {
        self.lock().get(&app_id.to_string())
    }

    pub fn insert(&self, app_id: &str, image: Arc<[u8]>) {
        self.lock().insert(app_id.to_string(), image);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<[u8]>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
