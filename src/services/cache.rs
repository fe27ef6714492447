use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A thread-safe cache with a TTL and an entry limit.
///
/// When full, inserting a new key evicts the entry closest to expiry.
pub struct Cache<V> {
    data: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    capacity: usize,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Clone> Cache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Get a live value; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.data.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.data.remove(key);
            None
        }
    }

    pub fn insert(&self, key: String, value: V) {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup();
            if self.data.len() >= self.capacity {
                self.evict_one();
            }
        }
        self.data.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) {
        self.data.retain(|key, _| !key.starts_with(prefix));
    }

    /// Remove all expired entries.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.data.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn evict_one(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic() {
        let cache = Cache::new(Duration::from_secs(60), 4);
        cache.insert("BTCUSDT/mlp".to_string(), 1);
        assert_eq!(cache.get("BTCUSDT/mlp"), Some(1));
        assert_eq!(cache.get("BTCUSDT/linear"), None);
    }

    #[test]
    fn test_cache_expiration() {
        let cache = Cache::new(Duration::from_millis(10), 4);
        cache.insert("key".to_string(), "value".to_string());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("key"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = Cache::new(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = Cache::new(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_remove_and_prefix() {
        let cache = Cache::new(Duration::from_secs(60), 8);
        cache.insert("BTCUSDT/linear".to_string(), 1);
        cache.insert("BTCUSDT/mlp".to_string(), 2);
        cache.insert("ETHUSDT/mlp".to_string(), 3);

        assert_eq!(cache.remove("ETHUSDT/mlp"), Some(3));
        assert_eq!(cache.remove("ETHUSDT/mlp"), None);

        cache.remove_prefix("BTCUSDT/");
        assert!(cache.is_empty());
    }
}
