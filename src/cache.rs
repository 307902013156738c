//! Bounded caches — spec §4.F.
//!
//! Keys embed `(path, size, mtimeNanos)` so a stale file never serves a
//! cached value. Eviction is least-recently-inserted, not LRU-on-read: a
//! `Vec` of keys in insertion order is trimmed from the front once a byte
//! budget is exceeded, the same bounded-structure shape the teacher uses
//! for its own latency ring buffer.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Identifies one version of one file's content without hashing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub size: u64,
    pub mtime_nanos: i128,
}

struct Entry<V> {
    key: CacheKey,
    value: V,
    bytes: usize,
}

/// A byte-budgeted cache evicting oldest-inserted entries first.
pub struct BoundedCache<V> {
    max_bytes: usize,
    current_bytes: usize,
    order: Vec<CacheKey>,
    entries: HashMap<CacheKey, Entry<V>>,
}

impl<V> BoundedCache<V> {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            current_bytes: 0,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Insert `value` sized `value_bytes`. Evicts the oldest entries until
    /// `current_bytes + value_bytes <= max_bytes`, unless the single entry
    /// alone exceeds the budget (in which case it's still stored — a cache
    /// miss is worse than slightly over-budget for one call).
    pub fn insert(&mut self, key: CacheKey, value: V, value_bytes: usize) {
        if let Some(old) = self.entries.remove(&key) {
            self.current_bytes -= old.bytes;
            self.order.retain(|k| k != &key);
        }

        while !self.order.is_empty() && self.current_bytes + value_bytes > self.max_bytes {
            let oldest = self.order.remove(0);
            if let Some(e) = self.entries.remove(&oldest) {
                self.current_bytes -= e.bytes;
            }
        }

        self.current_bytes += value_bytes;
        self.order.push(key.clone());
        self.entries.insert(
            key.clone(),
            Entry {
                key,
                value,
                bytes: value_bytes,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            current_bytes: self.current_bytes,
            max_bytes: self.max_bytes,
            entries: self.entries.len(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub current_bytes: usize,
    pub max_bytes: usize,
    pub entries: usize,
}

/// Hover markdown + flattened document-symbol caches shared across all
/// handlers, per §4.F and §5's shared-resource policy.
pub struct Caches {
    pub hover: Mutex<BoundedCache<String>>,
    pub document_symbols: Mutex<BoundedCache<Vec<crate::types::SymbolRecord>>>,
}

impl Caches {
    pub fn new(hover_max_bytes: usize, symbols_max_bytes: usize) -> Self {
        Self {
            hover: Mutex::new(BoundedCache::new(hover_max_bytes)),
            document_symbols: Mutex::new(BoundedCache::new(symbols_max_bytes)),
        }
    }

    pub async fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "hover": self.hover.lock().await.stats(),
            "documentSymbols": self.document_symbols.lock().await.stats(),
        })
    }
}

pub const DEFAULT_HOVER_CACHE_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_SYMBOLS_CACHE_BYTES: usize = 16 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> CacheKey {
        CacheKey {
            path: format!("file{n}.rs"),
            size: 100,
            mtime_nanos: n as i128,
        }
    }

    #[test]
    fn insert_and_get_roundtrips() {
        let mut cache: BoundedCache<String> = BoundedCache::new(1024);
        cache.insert(key(1), "hello".to_string(), 5);
        assert_eq!(cache.get(&key(1)), Some(&"hello".to_string()));
        assert_eq!(cache.stats().current_bytes, 5);
    }

    #[test]
    fn evicts_oldest_when_over_budget() {
        let mut cache: BoundedCache<String> = BoundedCache::new(10);
        cache.insert(key(1), "aaaaa".to_string(), 5);
        cache.insert(key(2), "bbbbb".to_string(), 5);
        assert_eq!(cache.stats().entries, 2);

        cache.insert(key(3), "ccccc".to_string(), 5);
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn distinct_mtime_is_a_distinct_key() {
        let mut cache: BoundedCache<String> = BoundedCache::new(1024);
        let stale = CacheKey { path: "f.rs".into(), size: 10, mtime_nanos: 1 };
        let fresh = CacheKey { path: "f.rs".into(), size: 10, mtime_nanos: 2 };
        cache.insert(stale.clone(), "old".to_string(), 3);
        assert!(cache.get(&fresh).is_none());
        cache.insert(fresh.clone(), "new".to_string(), 3);
        assert_eq!(cache.get(&stale), Some(&"old".to_string()));
        assert_eq!(cache.get(&fresh), Some(&"new".to_string()));
    }
}
