use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::config::LocalCacheConfig;
use crate::flag::FlagConfiguration;

/// LocalCache is the in-process tier: bounded by entry count, with a short time-to-live.
///
/// Entries are shared snapshots; evaluation never mutates a cached configuration.
#[derive(Clone)]
pub struct LocalCache {
    inner: Cache<String, Arc<FlagConfiguration>>,
}

impl LocalCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    pub fn from_config(config: &LocalCacheConfig) -> Self {
        Self::new(config.max_capacity, config.ttl)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<FlagConfiguration>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, config: Arc<FlagConfiguration>) {
        self.inner.insert(key, config).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }
}
