//! Injectable lookup cache for values that are cheap to recompute, such as
//! campaign names by id.
//!
//! The cache may be empty at any time and is never a source of truth. Failed
//! lookups are not cached, so a later call retries them.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub struct LookupCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for LookupCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> LookupCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches an
    /// `Ok(Some(_))` result. `Ok(None)` and errors are passed through uncached.
    ///
    /// The lock is not held across `fetch`; two concurrent misses for the same
    /// key may both fetch.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `fetch`.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &K, fetch: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(Some(hit));
        }
        let fetched = fetch().await?;
        if let Some(value) = &fetched {
            self.insert(key.clone(), value.clone());
        }
        Ok(fetched)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn hit_skips_fetch() {
        let cache: LookupCache<String, String> = LookupCache::new();
        cache.insert("42".into(), "Brand A".into());
        let calls = AtomicU32::new(0);
        let value = cache
            .get_or_try_fetch(&"42".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Some("other".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("Brand A"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_fetches_and_caches() {
        let cache: LookupCache<String, String> = LookupCache::new();
        let key = "7".to_string();
        let value = cache
            .get_or_try_fetch(&key, || async { Ok::<_, ()>(Some("Camp 7".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("Camp 7"));
        assert_eq!(cache.get(&key).as_deref(), Some("Camp 7"));
    }

    #[tokio::test]
    async fn failures_and_absent_values_are_not_cached() {
        let cache: LookupCache<String, String> = LookupCache::new();
        let key = "9".to_string();
        let err = cache
            .get_or_try_fetch(&key, || async { Err::<Option<String>, _>("boom") })
            .await;
        assert_eq!(err, Err("boom"));
        let none = cache
            .get_or_try_fetch(&key, || async { Ok::<_, ()>(None) })
            .await
            .unwrap();
        assert!(none.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties_cache() {
        let cache: LookupCache<u64, String> = LookupCache::new();
        cache.insert(1, "a".into());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
