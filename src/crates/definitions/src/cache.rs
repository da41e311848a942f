use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Sizing for a [`TtlCache`]. A zero capacity or a zero ttl disables caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl CacheConfig {
    pub const DISABLED: CacheConfig = CacheConfig {
        capacity: 0,
        ttl: Duration::ZERO,
    };

    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Bounded LRU cache whose entries expire `ttl` after insertion.
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    entries: Option<Mutex<LruCache<K, (Instant, V)>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        let entries = match NonZeroUsize::new(config.capacity) {
            Some(capacity) if !config.ttl.is_zero() => Some(Mutex::new(LruCache::new(capacity))),
            _ => None,
        };
        Self {
            entries,
            ttl: config.ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.as_ref()?.lock();
        let expired = match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        if let Some(entries) = &self.entries {
            entries.lock().put(key, (Instant::now(), value));
        }
    }

    /// Return the cached value, or run `load` and cache what it returns.
    /// Errors are not cached.
    pub fn get_or_try_load<E>(&self, key: K, load: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        if let Some(entries) = &self.entries {
            entries.lock().pop(key);
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn loads_once_then_hits() {
        let cache: TtlCache<String, u32> = TtlCache::new(CacheConfig::default());
        let loads = Cell::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_try_load("a".to_string(), || {
                    loads.set(loads.get() + 1);
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let cache: TtlCache<String, u32> = TtlCache::new(CacheConfig::default());
        assert!(cache.get_or_try_load("a".into(), || Err("down")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = TtlCache::new(CacheConfig::new(4, Duration::from_millis(10)));
        cache.insert(1, "one");
        assert_eq!(cache.get(&1), Some("one"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = TtlCache::new(CacheConfig::new(2, Duration::from_secs(60)));
        cache.insert(1, 'a');
        cache.insert(2, 'b');
        cache.get(&1);
        cache.insert(3, 'c');
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some('a'));
    }

    #[test]
    fn invalidate_and_disabled() {
        let cache = TtlCache::new(CacheConfig::default());
        cache.insert("k", 1);
        cache.invalidate(&"k");
        assert_eq!(cache.get(&"k"), None);

        let off = TtlCache::new(CacheConfig::DISABLED);
        off.insert("k", 1);
        assert!(!off.is_enabled());
        assert_eq!(off.get(&"k"), None);
    }
}
