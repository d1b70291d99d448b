//! Compiled query cache keyed by query shape

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, trace};

use crate::ExecutionError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
}

/// Shape fingerprint → compiled value. Unbounded; entries live until
/// [`QueryCache::clear`].
pub struct QueryCache<V> {
    entries: RwLock<HashMap<String, Arc<V>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<V> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Returns the cached value for `key`, compiling it on a miss.
    ///
    /// Compilation runs under the write lock after a second lookup, so
    /// concurrent callers with the same key observe a single value.
    pub fn get_or_compile<F>(&self, key: &str, compile: F) -> Result<Arc<V>, ExecutionError>
    where
        F: FnOnce() -> Result<V, ExecutionError>,
    {
        if let Some(value) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Query cache hit");
            return Ok(value);
        }

        let mut entries = self.entries.write().map_err(|_| ExecutionError::Poisoned)?;
        if let Some(value) = entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        info!(key, "Query cache miss, compiling");
        let value = Arc::new(compile()?);
        entries.insert(key.to_string(), Arc::clone(&value));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl<V> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_compiles_once_per_key() {
        let cache = QueryCache::new();
        let compiled = AtomicUsize::new(0);
        let compile = || {
            compiled.fetch_add(1, Ordering::SeqCst);
            Ok("plan".to_string())
        };

        let first = cache.get_or_compile("shape", compile).unwrap();
        let second = cache.get_or_compile("shape", compile).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiled.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, size: 1 });
    }

    #[test]
    fn test_concurrent_callers_share_one_value() {
        let cache = Arc::new(QueryCache::new());
        let compiled = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiled = Arc::clone(&compiled);
                thread::spawn(move || {
                    cache
                        .get_or_compile("shape", || {
                            compiled.fetch_add(1, Ordering::SeqCst);
                            Ok(42)
                        })
                        .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(compiled.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_failed_compilation_is_not_cached() {
        let cache: QueryCache<String> = QueryCache::new();
        let result = cache.get_or_compile("shape", || Err(ExecutionError::Cancelled));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::new();
        cache.get_or_compile("a", || Ok(1)).unwrap();
        cache.get_or_compile("b", || Ok(2)).unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
