/// Fingerprint-keyed result cache (§3, §4.5.3, §8).
///
/// Grounded on the teacher's `bin/web_server.rs` `AppState.candles_cache:
/// Cache<CacheKey, Arc<Vec<Candle>>>` — same crate, same Arc-wrapped value
/// to keep clones cheap. `get_with` gives single-flight coalescing for free:
/// concurrent lookups under the same fingerprint share one computation, which
/// is the cache integrity condition in §8.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::{EngineError, EngineResult};
use crate::fingerprint::Fingerprint;

#[derive(Clone)]
pub struct IndicatorCache<V>
where
    V: Send + Sync + Clone + 'static,
{
    inner: Cache<u64, Arc<V>>,
}

impl<V> IndicatorCache<V>
where
    V: Send + Sync + Clone + 'static,
{
    /// `max_capacity` bounds entry count (a proxy for the byte budget from
    /// §4.5.3 — callers size it against their own value's footprint);
    /// `ttl` bounds staleness.
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        IndicatorCache {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Returns the cached value for `fingerprint`, computing it via `init`
    /// on a miss. Concurrent callers with the same fingerprint block behind
    /// the first caller's `init` rather than each running their own —
    /// `moka` de-dupes this internally.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &Fingerprint, init: F) -> Arc<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.inner
            .get_with(fingerprint.0, async move { Arc::new(init().await) })
            .await
    }

    /// Same single-flight guarantee as [`get_or_compute`], for an `init`
    /// that can fail (§4.5.2 task execution). A failed computation is
    /// never cached — `moka` evicts it immediately on error, so the next
    /// lookup retries rather than replaying the failure.
    pub async fn get_or_try_compute<F, Fut>(&self, fingerprint: &Fingerprint, init: F) -> EngineResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<V>>,
    {
        self.inner
            .try_get_with(fingerprint.0, async move { init().await.map(Arc::new) })
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|e| EngineError::Internal(e.to_string())))
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.invalidate(&fingerprint.0);
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    fn fp(v: u64) -> Fingerprint {
        Fingerprint(v)
    }

    #[tokio::test]
    async fn concurrent_lookups_of_same_fingerprint_compute_once() {
        let cache: IndicatorCache<i32> = IndicatorCache::new(100, Duration::from_secs(60));
        let computations = StdArc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let computations = StdArc::clone(&computations);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&fp(42), || async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        7
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(*h.await.unwrap(), 7);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn differing_fingerprints_compute_independently() {
        let cache: IndicatorCache<i32> = IndicatorCache::new(100, Duration::from_secs(60));
        let a = cache.get_or_compute(&fp(1), || async { 10 }).await;
        let b = cache.get_or_compute(&fp(2), || async { 20 }).await;
        assert_eq!(*a, 10);
        assert_eq!(*b, 20);
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached_and_preserves_the_error() {
        let cache: IndicatorCache<i32> = IndicatorCache::new(100, Duration::from_secs(60));
        let attempts = StdArc::new(AtomicU32::new(0));

        let compute = |attempts: StdArc<AtomicU32>| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::InsufficientData { required: 3, got: 1 })
        };

        let err = cache
            .get_or_try_compute(&fp(9), || compute(StdArc::clone(&attempts)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { required: 3, got: 1 }));
        assert_eq!(cache.entry_count(), 0);

        let err = cache
            .get_or_try_compute(&fp(9), || compute(StdArc::clone(&attempts)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2, "a failed lookup must retry, not replay");
    }

    #[tokio::test]
    async fn invalidate_forces_recomputation() {
        let cache: IndicatorCache<i32> = IndicatorCache::new(100, Duration::from_secs(60));
        let computations = StdArc::new(AtomicU32::new(0));

        let compute = || {
            let computations = StdArc::clone(&computations);
            async move {
                computations.fetch_add(1, Ordering::SeqCst);
                99
            }
        };

        cache.get_or_compute(&fp(5), compute).await;
        cache.invalidate(&fp(5));
        cache.get_or_compute(&fp(5), compute).await;

        assert_eq!(computations.load(Ordering::SeqCst), 2);
    }
}
