// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

/// Populate-once memoisation map shared between concurrent readers.
///
/// Values are computed outside of the lock. When two callers race on the same key both compute
/// the value and the first insert is kept, the second result is dropped.
#[derive(Debug)]
pub(crate) struct MemoCache<K, V: ?Sized> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V: ?Sized> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        {
            let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = map.get(&key) {
                return value.clone();
            }
        }

        let value = compute();
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key).or_insert(value).clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::MemoCache;

    #[test]
    fn computes_once_per_key() {
        let cache: MemoCache<u8, [u8]> = MemoCache::default();
        let mut calls = 0;

        let first = cache.get_or_insert_with(1, || {
            calls += 1;
            Arc::from(vec![1, 2])
        });
        let second = cache.get_or_insert_with(1, || {
            calls += 1;
            Arc::from(vec![3])
        });

        assert_eq!(calls, 1);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }
}
