//! Explicit cache registry
//!
//! One `DatasetCache` instance exists per dataset name, process-wide. The
//! registry is owned by the application's composition root and injected
//! into consumers; there is no hidden module-level singleton. Independent
//! datasets never share a lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use types::dataset::DatasetName;

use crate::bus::spawn_change_listener;
use crate::cache::{CacheConfig, DatasetCache};
use crate::store::CacheStore;

/// Registry of dataset caches sharing one store and configuration.
pub struct CacheRegistry {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    caches: RwLock<HashMap<DatasetName, Arc<DatasetCache>>>,
}

impl CacheRegistry {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cache for a dataset, creating it (and starting its
    /// change-bus listener) on first use.
    pub async fn get_or_create(
        &self,
        name: DatasetName,
        primary_key: &str,
    ) -> Arc<DatasetCache> {
        if let Some(cache) = self.get(&name) {
            return cache;
        }

        let cache = Arc::new(DatasetCache::new(
            name.clone(),
            primary_key,
            Arc::clone(&self.store),
            self.config.clone(),
        ));

        let created = {
            let mut caches = self.caches.write().unwrap_or_else(|e| e.into_inner());
            match caches.get(&name) {
                // Lost the race to a concurrent creator; use theirs.
                Some(existing) => {
                    return Arc::clone(existing);
                }
                None => {
                    caches.insert(name.clone(), Arc::clone(&cache));
                    cache
                }
            }
        };

        info!(dataset = %name, primary_key, "dataset cache registered");
        spawn_change_listener(Arc::clone(&created)).await;
        created
    }

    /// Look up an existing cache.
    pub fn get(&self, name: &DatasetName) -> Option<Arc<DatasetCache>> {
        let caches = self.caches.read().unwrap_or_else(|e| e.into_inner());
        caches.get(name).map(Arc::clone)
    }

    /// Names of all registered datasets, sorted for determinism.
    pub fn dataset_names(&self) -> Vec<DatasetName> {
        let caches = self.caches.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<DatasetName> = caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered datasets.
    pub fn len(&self) -> usize {
        let caches = self.caches.read().unwrap_or_else(|e| e.into_inner());
        caches.len()
    }

    /// Whether no dataset has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
