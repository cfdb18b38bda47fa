//! Memoised CallableCaches keyed by qualified callable name

use super::CallableCache;
use crate::errors::Result;
use crate::introspection::{CallableInfo, Repository};
use dashmap::DashMap;
use std::sync::Arc;

/// Build-once store of callable plans
///
/// Build failures are cached too: a signature that cannot be marshaled stays
/// unusable and reports the same error on every lookup.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Result<Arc<CallableCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for `info`, building it on first request
    pub fn get_or_build(&self, info: &CallableInfo) -> Result<Arc<CallableCache>> {
        let key = info.qualified_name();
        if let Some(entry) = self.caches.get(&key) {
            return entry.value().clone();
        }
        // Build outside the shard lock; a racing builder produces an identical plan
        let built = CallableCache::build(info).map(Arc::new);
        self.caches.entry(key).or_insert(built).value().clone()
    }

    /// Resolve a callable through `repo` and return its plan
    pub fn lookup(&self, repo: &dyn Repository, namespace: &str, name: &str) -> Result<Arc<CallableCache>> {
        let info = repo.find_callable(namespace, name)?;
        self.get_or_build(&info)
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.caches.contains_key(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn clear(&self) {
        self.caches.clear();
    }
}
