use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};

use crate::cache::{cache_key, BackoffPolicy, ConnectionSupervisor, DistributedCache, LocalCache};
use crate::config::{DistributedCacheConfig, EngineConfig};
use crate::error::CacheError;
use crate::flag::{FlagConfiguration, FlagScope};

/// Outcome of [TieredCache::clear_all].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Distributed entries deleted.
    pub deleted: usize,
    /// Batches that could not be scanned or deleted.
    pub failed_batches: usize,
    /// True when the distributed tier was offline and was not touched.
    pub skipped: bool,
}

/// TieredCache looks configurations up in the local tier, then the distributed tier.
///
/// Distributed cache failures never surface: reads fall through as misses and writes are
/// dropped, both with a warning. While the [ConnectionSupervisor] reports the distributed tier
/// as unavailable, it is not contacted at all.
pub struct TieredCache {
    local: LocalCache,
    distributed: Arc<dyn DistributedCache>,
    supervisor: ConnectionSupervisor,
    settings: DistributedCacheConfig,
}

impl TieredCache {
    pub fn new(distributed: Arc<dyn DistributedCache>, config: &EngineConfig) -> Self {
        Self {
            local: LocalCache::from_config(&config.local_cache),
            supervisor: ConnectionSupervisor::new(
                distributed.clone(),
                BackoffPolicy::from_config(&config.reconnect),
            ),
            distributed,
            settings: config.distributed_cache.clone(),
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn key(&self, scope: &FlagScope, flag_key: &str) -> String {
        cache_key(&self.settings.key_prefix, scope, flag_key)
    }

    pub async fn get(&self, scope: &FlagScope, flag_key: &str) -> Option<Arc<FlagConfiguration>> {
        let key = self.key(scope, flag_key);
        if let Some(config) = self.local.get(&key).await {
            debug!("local cache hit for {}", key);
            return Some(config);
        }
        if !self.supervisor.is_available() {
            return None;
        }

        let bytes = match self.distributed.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("cache miss for {}", key);
                return None;
            }
            Err(e) => {
                self.soft_failure("read", &key, &e);
                return None;
            }
        };

        match serde_json::from_slice::<FlagConfiguration>(&bytes) {
            Ok(config) => {
                debug!("distributed cache hit for {}", key);
                let config = Arc::new(config);
                self.local.insert(key, config.clone()).await;
                Some(config)
            }
            Err(e) => {
                warn!("discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, scope: &FlagScope, config: Arc<FlagConfiguration>) {
        let key = self.key(scope, &config.key);
        self.local.insert(key.clone(), config.clone()).await;
        if !self.supervisor.is_available() {
            return;
        }

        let result = match serde_json::to_vec(config.as_ref()) {
            Ok(bytes) => self.distributed.set(&key, bytes, self.settings.ttl).await,
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(e) = result {
            self.soft_failure("write", &key, &e);
        }
    }

    pub async fn remove(&self, scope: &FlagScope, flag_key: &str) {
        let key = self.key(scope, flag_key);
        self.local.invalidate(&key).await;
        if !self.supervisor.is_available() {
            return;
        }
        if let Err(e) = self.distributed.delete(&key).await {
            self.soft_failure("delete", &key, &e);
        }
    }

    /// Empties the local tier and deletes every key under the configured prefix from the
    /// distributed tier, scanning and deleting `scan_batch_size` keys at a time. A failed batch
    /// is logged and skipped.
    pub async fn clear_all(&self) -> ClearReport {
        self.local.invalidate_all().await;

        let mut report = ClearReport::default();
        if !self.supervisor.is_available() {
            warn!("distributed cache unavailable, only the local tier was cleared");
            report.skipped = true;
            return report;
        }

        let pattern = format!("{}:*", self.settings.key_prefix);
        let batch_size = self.settings.scan_batch_size.max(1);
        let mut batches = self
            .distributed
            .scan_keys(&pattern, batch_size)
            .chunks(batch_size);

        while let Some(batch) = batches.next().await {
            let (keys, errors): (Vec<_>, Vec<_>) = batch.into_iter().partition(Result::is_ok);
            let keys: Vec<String> = keys.into_iter().filter_map(Result::ok).collect();

            if let Some(Err(e)) = errors.into_iter().next() {
                report.failed_batches += 1;
                self.soft_failure("scan", &pattern, &e);
                break;
            }

            match self.distributed.delete_batch(&keys).await {
                Ok(deleted) => report.deleted += deleted,
                Err(e) => {
                    report.failed_batches += 1;
                    self.soft_failure("batch delete", &pattern, &e);
                    if e.is_connection() {
                        break;
                    }
                }
            }
        }

        debug!(
            "cleared {} distributed cache entries ({} failed batches)",
            report.deleted, report.failed_batches
        );
        report
    }

    fn soft_failure(&self, operation: &str, key: &str, err: &CacheError) {
        warn!("distributed cache {} failed for {}: {}", operation, key, err);
        self.supervisor.report_failure(err);
    }
}
