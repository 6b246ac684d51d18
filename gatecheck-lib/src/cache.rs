//! TTL-gated cache around an expensive recomputation.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// Produces a fresh value for a [`ResultCache`].
#[async_trait]
pub trait CacheSource<T>: Send + Sync {
    async fn refresh(&self) -> Result<T>;
}

/// A served cache value plus the moment it was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub data: T,
    pub updated_at: DateTime<Utc>,
}

// Invariant: data and updated_at are both present or both absent.
struct CacheEntry<T> {
    data: Option<T>,
    updated_at: Option<DateTime<Utc>>,
}

/// Wraps a recomputation with a time-to-live gate.
///
/// A stale (or empty) cache triggers one refresh; a refresh failure
/// degrades freshness, not availability: the previous snapshot keeps being
/// served, and only an empty cache returns nothing. Recomputation is
/// single-flight per cache instance; a caller arriving mid-refresh awaits
/// it instead of starting another.
pub struct ResultCache<T> {
    ttl: TimeDelta,
    source: Box<dyn CacheSource<T>>,
    state: Mutex<CacheEntry<T>>,
}

impl<T: Clone + Send> ResultCache<T> {
    pub fn new(ttl: std::time::Duration, source: Box<dyn CacheSource<T>>) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            source,
            state: Mutex::new(CacheEntry { data: None, updated_at: None }),
        }
    }

    pub async fn get(&self) -> Option<Snapshot<T>> {
        let mut state = self.state.lock().await;

        if self.is_stale(&state) {
            match self.source.refresh().await {
                Ok(data) => {
                    state.data = Some(data);
                    state.updated_at = Some(Utc::now());
                    debug!("cache refreshed");
                }
                Err(err) => {
                    warn!(%err, "cache refresh failed, serving previous data if any");
                }
            }
        }

        match (&state.data, state.updated_at) {
            (Some(data), Some(updated_at)) => Some(Snapshot { data: data.clone(), updated_at }),
            _ => None,
        }
    }

    fn is_stale(&self, entry: &CacheEntry<T>) -> bool {
        match entry.updated_at {
            None => true,
            Some(updated_at) => Utc::now() - updated_at > self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingSource {
        refreshes: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        delay: Duration,
    }

    #[async_trait]
    impl CacheSource<u64> for CountingSource {
        async fn refresh(&self) -> Result<u64> {
            tokio::time::sleep(self.delay).await;
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) as u64;
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::GateError::Directory("refresh failed".to_string()));
            }
            Ok(n)
        }
    }

    fn cache(
        ttl: Duration,
        delay: Duration,
    ) -> (ResultCache<u64>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            refreshes: Arc::clone(&refreshes),
            fail: Arc::clone(&fail),
            delay,
        };
        (ResultCache::new(ttl, Box::new(source)), refreshes, fail)
    }

    #[tokio::test]
    async fn two_gets_within_ttl_refresh_once() {
        let (cache, refreshes, _) = cache(Duration::from_secs(3600), Duration::ZERO);

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failed_refresh_serves_previous_snapshot_unchanged() {
        // Zero TTL: every get is stale.
        let (cache, refreshes, fail) = cache(Duration::ZERO, Duration::ZERO);

        let first = cache.get().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        let second = cache.get().await.unwrap();

        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(second.data, first.data);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn failed_refresh_with_no_prior_data_returns_none() {
        let (cache, _, fail) = cache(Duration::from_secs(3600), Duration::ZERO);
        fail.store(true, Ordering::SeqCst);

        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn recovery_after_failure_updates_the_snapshot() {
        let (cache, _, fail) = cache(Duration::ZERO, Duration::ZERO);
        fail.store(true, Ordering::SeqCst);
        assert!(cache.get().await.is_none());

        fail.store(false, Ordering::SeqCst);
        assert!(cache.get().await.is_some());
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_refresh() {
        let (cache, refreshes, _) =
            cache(Duration::from_secs(3600), Duration::from_millis(100));
        let cache = Arc::new(cache);

        let a = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get().await }
        });
        let b = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get().await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
    }
}
