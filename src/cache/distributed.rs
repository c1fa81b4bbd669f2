use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CacheError;

/// DistributedCache is a client for the cache shared by every engine instance.
///
/// The client is a long-lived handle shared between tasks. Connection failures are reported as
/// [CacheError::Connection]; the [crate::ConnectionSupervisor] then calls
/// [DistributedCache::reconnect] until the connection is back.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Lazily lists the keys matching a glob `pattern` (`*` matches any run of characters),
    /// fetching `page_size` keys per round-trip.
    fn scan_keys<'a>(
        &'a self,
        pattern: &'a str,
        page_size: usize,
    ) -> BoxStream<'a, Result<String, CacheError>>;

    /// Deletes `keys`, returning how many existed.
    async fn delete_batch(&self, keys: &[String]) -> Result<usize, CacheError>;

    async fn reconnect(&self) -> Result<(), CacheError>;
}

/// Translates a glob with `*` wildcards into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| CacheError::Backend(e.to_string()))
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// InMemoryDistributedCache is a process-local [DistributedCache].
///
/// It stands in for a real shared cache in tests and single-process deployments, and can be
/// told to drop its "connection" or to fail delete batches.
#[derive(Default)]
pub struct InMemoryDistributedCache {
    entries: RwLock<BTreeMap<String, Entry>>,
    offline: AtomicBool,
    failing_batches: AtomicUsize,
    reconnect_calls: AtomicUsize,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every operation fails with [CacheError::Connection], including reconnects.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to [DistributedCache::delete_batch] fail.
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    /// Returns up to `page_size` live keys matching `matcher` that sort after `cursor`.
    async fn page(
        &self,
        matcher: &Regex,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<String>, CacheError> {
        self.check_online()?;
        let entries = self.entries.read().await;
        let keys = entries
            .iter()
            .filter(|(key, _)| cursor.map_or(true, |c| key.as_str() > c))
            .filter(|(key, entry)| !entry.is_expired() && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .take(page_size)
            .collect();
        Ok(keys)
    }
}

/// Scan progress: `None` once exhausted, otherwise the last key returned so far.
type Cursor = Option<Option<String>>;

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_online()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).map_or(false, |e| !e.is_expired()))
    }

    fn scan_keys<'a>(
        &'a self,
        pattern: &'a str,
        page_size: usize,
    ) -> BoxStream<'a, Result<String, CacheError>> {
        let matcher = match glob_to_regex(pattern) {
            Ok(matcher) => matcher,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let page_size = page_size.max(1);

        let start: Cursor = Some(None);
        stream::unfold(start, move |cursor| {
            let matcher = matcher.clone();
            async move {
                let after = cursor?;
                match self.page(&matcher, after.as_deref(), page_size).await {
                    Err(e) => Some((vec![Err(e)], None)),
                    Ok(keys) if keys.is_empty() => None,
                    Ok(keys) => {
                        let next = if keys.len() < page_size {
                            None
                        } else {
                            Some(keys.last().cloned())
                        };
                        Some((keys.into_iter().map(Ok).collect::<Vec<_>>(), next))
                    }
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<usize, CacheError> {
        self.check_online()?;
        let failing = self.failing_batches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_batches.store(failing - 1, Ordering::SeqCst);
            return Err(CacheError::Backend("batch rejected".to_string()));
        }

        let mut entries = self.entries.write().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|e| !e.is_expired())
            .count())
    }

    async fn reconnect(&self) -> Result<(), CacheError> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()
    }
}
