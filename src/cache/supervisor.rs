use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{BackoffPolicy, DistributedCache};
use crate::error::CacheError;

#[derive(Debug)]
struct ConnectionState {
    available: AtomicBool,
    reconnecting: AtomicBool,
    attempts: AtomicU32,
}

impl ConnectionState {
    /// Releases the reconnection slot before the tier is reopened. A failure reported once the
    /// slot is free starts its own cycle, so the tier is never left offline with no task
    /// running.
    fn end_cycle(&self, reopen: bool) {
        self.attempts.store(0, Ordering::Release);
        self.reconnecting.store(false, Ordering::Release);
        if reopen {
            self.available.store(true, Ordering::Release);
        }
    }
}

/// ConnectionSupervisor tracks whether the distributed tier is usable and owns the single
/// background task that re-establishes its connection.
///
/// Any number of callers may report connection failures concurrently; at most one
/// reconnection task runs at a time.
pub struct ConnectionSupervisor {
    cache: Arc<dyn DistributedCache>,
    policy: BackoffPolicy,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(cache: Arc<dyn DistributedCache>, policy: BackoffPolicy) -> Self {
        Self {
            cache,
            policy,
            state: Arc::new(ConnectionState {
                available: AtomicBool::new(true),
                reconnecting: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.reconnecting.load(Ordering::Acquire)
    }

    /// Failed reconnection attempts in the current cycle.
    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::Acquire)
    }

    /// Records a failed cache operation. Connection failures take the tier offline and start a
    /// reconnection task unless one is already running; other errors are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn report_failure(&self, err: &CacheError) {
        if !err.is_connection() {
            return;
        }
        self.state.available.store(false, Ordering::Release);

        if self
            .state
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconnection already in progress");
            return;
        }

        warn!("distributed cache connection lost: {}", err);
        tokio::spawn(reconnect_loop(
            self.cache.clone(),
            self.policy.clone(),
            self.state.clone(),
            self.shutdown.clone(),
        ));
    }

    /// Stops any reconnection task. The tier stays in whatever state it was in.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn reconnect_loop(
    cache: Arc<dyn DistributedCache>,
    policy: BackoffPolicy,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
) {
    loop {
        let attempt = state.attempts.load(Ordering::Acquire);
        if attempt >= policy.max_attempts {
            error!(
                "giving up on distributed cache after {} reconnection attempts",
                attempt
            );
            // the next operation probes the tier again and starts a fresh cycle on failure
            state.end_cycle(true);
            return;
        }

        let delay = policy.delay(attempt);
        tokio::select! {
            _ = shutdown.cancelled() => {
                state.end_cycle(false);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match cache.reconnect().await {
            Ok(()) => {
                info!(
                    "distributed cache reconnected after {} failed attempts",
                    attempt
                );
                state.end_cycle(true);
                return;
            }
            Err(e) => {
                warn!("distributed cache reconnection attempt {} failed: {}", attempt + 1, e);
                state.attempts.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}
