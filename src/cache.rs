use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Capacity-bounded map with least-recently-used eviction.
///
/// Recency is tracked with a monotonically increasing access counter rather
/// than a linked list; eviction scans for the smallest counter. Capacities
/// here are a few thousand entries at most, so the scan stays cheap.
#[derive(Debug, Clone)]
pub struct BoundedCache<V> {
    capacity: usize,
    entries: HashMap<String, CacheEntry<V>>,
    access: u64,
    stats: CacheStats,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            access: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.access += 1;
        let access = self.access;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = access;
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, value: V) {
        self.access += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: self.access,
            },
        );
    }

    /// Shrinks or grows the bound; evicts immediately when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru_key {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

/// Session cache of decrypted identifiers.
pub type DecryptionCache = BoundedCache<String>;

pub fn passphrase_digest(passphrase: &str) -> String {
    format!("{:x}", Sha256::digest(passphrase.as_bytes()))
}

/// `ciphertext::digest(passphrase)`; the plaintext passphrase never becomes
/// part of a key.
pub fn decryption_cache_key(ciphertext: &str, passphrase: &str) -> String {
    format!("{}::{}", ciphertext, passphrase_digest(passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_entry() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a".into(), "1".to_string());
        cache.insert("b".into(), "2".to_string());
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        cache.insert("c".into(), "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("a".into(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn shrinking_capacity_evicts_oldest() {
        let mut cache = BoundedCache::new(4);
        for k in ["a", "b", "c", "d"] {
            cache.insert(k.to_string(), k.to_string());
        }
        cache.set_capacity(2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn cache_key_hides_passphrase() {
        let key = decryption_cache_key("enc:v1:abc", "hunter2");
        assert!(key.starts_with("enc:v1:abc::"));
        assert!(!key.contains("hunter2"));
        assert_eq!(key, decryption_cache_key("enc:v1:abc", "hunter2"));
        assert_ne!(key, decryption_cache_key("enc:v1:abc", "hunter3"));
    }
}
