//! Cache store adapter.
//!
//! [`CacheStore`] fronts a [`CacheBackend`] and collapses every failure mode
//! (connection errors, protocol errors, deadlines) into [`CacheUnavailable`].
//! After a failure the adapter stops calling the backend for a cool-down period
//! and answers `CacheUnavailable` immediately; the first call after the
//! cool-down probes the backend again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::CacheConfig;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache protocol error: {0}")]
    Protocol(String),
    #[error("cache operation timed out")]
    Timeout,
}

/// The single failure signal callers see from the cache.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cache backend unavailable")]
pub struct CacheUnavailable;

/// A key/value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError>;

    /// Remove one key, reporting how many entries were removed.
    async fn delete(&self, key: &str) -> Result<u64, BackendError>;

    /// Remove every key starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;

    /// Release pooled connections. Calls after `close` fail.
    async fn close(&self) {}
}

/// Process-wide up/down flag with a cool-down.
///
/// `down_since` holds the failure time in milliseconds since `epoch`, plus one,
/// so that zero can mean "up".
#[derive(Debug)]
struct Liveness {
    epoch: Instant,
    down_since: AtomicU64,
    cooldown: Duration,
}

impl Liveness {
    fn new(cooldown: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            down_since: AtomicU64::new(0),
            cooldown,
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_available(&self) -> bool {
        match self.down_since.load(Ordering::Acquire) {
            0 => true,
            stamp => {
                let elapsed = self.now_ms().saturating_sub(stamp - 1);
                u128::from(elapsed) >= self.cooldown.as_millis()
            }
        }
    }

    /// Returns true when this call flipped the flag from up to down.
    fn mark_down(&self) -> bool {
        let stamp = self.now_ms().saturating_add(1);
        self.down_since.swap(stamp, Ordering::AcqRel) == 0
    }

    /// Returns true when this call flipped the flag from down to up.
    fn mark_up(&self) -> bool {
        self.down_since.load(Ordering::Acquire) != 0
            && self.down_since.swap(0, Ordering::AcqRel) != 0
    }
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    liveness: Liveness,
    op_timeout: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            liveness: Liveness::new(config.cooldown()),
            op_timeout: config.op_timeout(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// False while the cool-down after a failure is running.
    pub fn is_available(&self) -> bool {
        self.liveness.is_available()
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheUnavailable> {
        self.guarded("get", key, self.backend.get(key)).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheUnavailable> {
        self.guarded("set", key, self.backend.set_ex(key, value, ttl))
            .await
    }

    /// Returns whether an entry was removed.
    pub async fn delete_exact(&self, key: &str) -> Result<bool, CacheUnavailable> {
        self.guarded("delete", key, self.backend.delete(key))
            .await
            .map(|removed| removed > 0)
    }

    pub async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheUnavailable> {
        self.guarded("delete_prefix", prefix, self.backend.delete_prefix(prefix))
            .await
    }

    /// Probe the backend regardless of the cool-down and update liveness.
    pub async fn ping(&self) -> bool {
        let outcome = tokio::time::timeout(self.op_timeout, self.backend.ping()).await;
        match outcome {
            Ok(Ok(())) => {
                self.record_success();
                true
            }
            Ok(Err(err)) => {
                self.record_failure("ping", "", &err);
                false
            }
            Err(_) => {
                self.record_failure("ping", "", &BackendError::Timeout);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }

    async fn guarded<T, F>(
        &self,
        op: &'static str,
        key: &str,
        call: F,
    ) -> Result<T, CacheUnavailable>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        if !self.liveness.is_available() {
            debug!(target: SOURCE, op, key, "cache in cool-down, skipping backend");
            return Err(CacheUnavailable);
        }

        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(op, key, &err);
                Err(CacheUnavailable)
            }
            Err(_) => {
                self.record_failure(op, key, &BackendError::Timeout);
                Err(CacheUnavailable)
            }
        }
    }

    fn record_success(&self) {
        if self.liveness.mark_up() {
            info!(
                target: SOURCE,
                backend = self.backend.name(),
                "cache backend reachable again"
            );
        }
    }

    fn record_failure(&self, op: &'static str, key: &str, err: &BackendError) {
        counter!("pressroom_cache_backend_error_total", "op" => op).increment(1);
        if self.liveness.mark_down() {
            warn!(
                target: SOURCE,
                backend = self.backend.name(),
                op,
                key,
                error = %err,
                cooldown_ms = u64::try_from(self.liveness.cooldown.as_millis()).unwrap_or(u64::MAX),
                "cache backend unavailable, serving from the store"
            );
        } else {
            debug!(target: SOURCE, op, key, error = %err, "cache backend still failing");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;

    /// Counts calls and fails while `down` is set.
    #[derive(Default)]
    struct FlakyBackend {
        down: AtomicBool,
        calls: AtomicUsize,
        stall: AtomicBool,
    }

    impl FlakyBackend {
        async fn answer<T>(&self, value: T) -> Result<T, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                Err(BackendError::Connection("refused".into()))
            } else {
                Ok(value)
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
            self.answer(Some(Bytes::from_static(b"v"))).await
        }

        async fn set_ex(&self, _: &str, _: Bytes, _: Duration) -> Result<(), BackendError> {
            self.answer(()).await
        }

        async fn delete(&self, _key: &str) -> Result<u64, BackendError> {
            self.answer(1).await
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, BackendError> {
            self.answer(3).await
        }

        async fn ping(&self) -> Result<(), BackendError> {
            self.answer(()).await
        }
    }

    fn store(backend: Arc<FlakyBackend>, cooldown_ms: u64, op_timeout_ms: u64) -> CacheStore {
        let config = CacheConfig {
            cooldown_ms,
            op_timeout_ms,
            ..Default::default()
        };
        CacheStore::new(backend, &config)
    }

    #[tokio::test]
    async fn healthy_backend_passes_through() {
        let backend = Arc::new(FlakyBackend::default());
        let store = store(backend.clone(), 1_000, 1_000);

        assert_eq!(
            store.get("k").await.expect("get"),
            Some(Bytes::from_static(b"v"))
        );
        assert!(store.delete_exact("k").await.expect("delete"));
        assert_eq!(store.delete_by_prefix("p").await.expect("prefix"), 3);
        assert!(store.ping().await);
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn failure_starts_cooldown_and_skips_backend() {
        let backend = Arc::new(FlakyBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let store = store(backend.clone(), 60_000, 1_000);

        assert_eq!(store.get("k").await, Err(CacheUnavailable));
        assert!(!store.is_available());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            assert_eq!(store.get("k").await, Err(CacheUnavailable));
            assert_eq!(
                store.set_with_ttl("k", Bytes::new(), Duration::from_secs(1)).await,
                Err(CacheUnavailable)
            );
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_is_probed_again_after_cooldown() {
        let backend = Arc::new(FlakyBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let store = store(backend.clone(), 20, 1_000);

        assert!(store.get("k").await.is_err());
        backend.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.is_available());
        assert!(store.get("k").await.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ping_ignores_cooldown_and_restores_liveness() {
        let backend = Arc::new(FlakyBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let store = store(backend.clone(), 60_000, 1_000);

        assert!(!store.ping().await);
        assert!(!store.is_available());

        backend.down.store(false, Ordering::SeqCst);
        assert!(store.ping().await);
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn slow_backend_counts_as_unavailable() {
        let backend = Arc::new(FlakyBackend::default());
        backend.stall.store(true, Ordering::SeqCst);
        let store = store(backend.clone(), 60_000, 10);

        assert_eq!(store.get("k").await, Err(CacheUnavailable));
        assert!(!store.is_available());
    }
}
