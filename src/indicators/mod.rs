/// Indicator pipeline (C5, §4.5): task types, worker pool, fingerprint
/// cache, data-frame pool.
pub mod bollinger;
pub mod cache;
pub mod dataframe;
pub mod ema;
pub mod pool;
pub mod rsi;
pub mod sma;
pub mod vwap;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::candle::Candle;
use crate::error::EngineResult;
use crate::fingerprint::Fingerprint;
use crate::indicators::cache::IndicatorCache;
use crate::indicators::dataframe::DataFramePool;
use crate::indicators::pool::WorkerPool;

/// Built-in task types implement this contract (§4.5.2). `Execute` is
/// CPU-bound and never suspends on I/O; it is spawned onto a worker pool
/// thread, not awaited inline on the async runtime.
pub trait IndicatorTask: Send + Sync {
    type Output: Send + Sync + Clone + 'static;

    fn id(&self) -> String;
    fn priority(&self) -> u8 {
        0
    }
    fn execute(&self, closes: &[f64], volumes: &[u64]) -> EngineResult<Self::Output>;
}

/// Validates that no close is NaN/Inf before any indicator runs (§4.5.2,
/// `ErrBadInput`).
pub fn validate_closes(closes: &[f64]) -> EngineResult<()> {
    if closes.iter().any(|c| !c.is_finite()) {
        return Err(crate::error::EngineError::BadInput(
            "non-finite value in close series".into(),
        ));
    }
    Ok(())
}

pub fn require_length(closes: &[f64], minimum: usize) -> EngineResult<()> {
    if closes.len() < minimum {
        return Err(crate::error::EngineError::InsufficientData {
            required: minimum,
            got: closes.len(),
        });
    }
    Ok(())
}

/// Composite task wrapping N sub-tasks, returning their results in
/// submission order (§4.5.2, "Batch"). A single sub-task's error does not
/// stop the others; each slot carries its own `Result`.
pub struct BatchTask<T>
where
    T: IndicatorTask,
{
    pub sub_tasks: Vec<T>,
}

impl<T> BatchTask<T>
where
    T: IndicatorTask,
{
    pub fn new(sub_tasks: Vec<T>) -> Self {
        BatchTask { sub_tasks }
    }

    pub fn run(&self, closes: &[f64], volumes: &[u64]) -> Vec<EngineResult<T::Output>> {
        self.sub_tasks
            .iter()
            .map(|task| task.execute(closes, volumes))
            .collect()
    }
}

/// Ties the worker pool (§4.5.1), the fingerprint cache (§4.5.3) and the
/// data-frame pool (§4.5.4) together for one task type. One pipeline per
/// indicator type, sharing the same worker pool underneath so the
/// `max_workers` bound applies across indicator types, not per type.
pub struct IndicatorPipeline<T>
where
    T: IndicatorTask + 'static,
{
    pool: Arc<WorkerPool>,
    cache: IndicatorCache<T::Output>,
    frames: Arc<DataFramePool>,
}

impl<T> IndicatorPipeline<T>
where
    T: IndicatorTask + 'static,
{
    pub fn new(pool: Arc<WorkerPool>, cache: IndicatorCache<T::Output>, frames: Arc<DataFramePool>) -> Self {
        IndicatorPipeline { pool, cache, frames }
    }

    /// Submits `task` against `candles`, coalescing concurrent callers with
    /// the same `fingerprint` into a single `Execute` (§8 cache integrity
    /// condition). `cancel` aborts the underlying worker-pool submission,
    /// not a cache hit already in flight from another caller.
    pub async fn submit(
        &self,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
        task: Arc<T>,
        candles: &[Candle],
    ) -> EngineResult<Arc<T::Output>> {
        let mut frame = self.frames.acquire();
        frame.load(candles);
        let closes = frame.close.clone();
        let volumes = frame.volume.clone();
        drop(frame);

        let pool = Arc::clone(&self.pool);
        let cancel = cancel.clone();
        self.cache
            .get_or_try_compute(fingerprint, move || async move {
                pool.submit(&cancel, move || task.execute(&closes, &volumes)).await
            })
            .await
    }

    pub fn cache_entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::{Interval, Price};
    use crate::indicators::pool::AdmissionMode;
    use crate::indicators::sma::Sma;
    use chrono::Utc;
    use std::time::Duration;

    fn candle(close: f64) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|X".into(),
            timestamp: Utc::now(),
            interval: Interval::OneMinute,
            open: Price::from_f64(close),
            high: Price::from_f64(close),
            low: Price::from_f64(close),
            close: Price::from_f64(close),
            volume: 1,
            open_interest: 0,
        }
    }

    fn pipeline() -> IndicatorPipeline<Sma> {
        IndicatorPipeline::new(
            Arc::new(WorkerPool::new(4, 16, AdmissionMode::BlockWithTimeout(Duration::from_secs(1)))),
            IndicatorCache::new(1000, Duration::from_secs(60)),
            Arc::new(DataFramePool::new(4)),
        )
    }

    #[tokio::test]
    async fn submit_computes_and_caches_by_fingerprint() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let candles: Vec<Candle> = [1.0, 2.0, 3.0].into_iter().map(candle).collect();
        let fp = Fingerprint(1);

        let first = pipeline
            .submit(&fp, &cancel, Arc::new(Sma { period: 3 }), &candles)
            .await
            .unwrap();
        assert_eq!(*first, vec![2.0]);
        assert_eq!(pipeline.cache_entry_count(), 1);

        let second = pipeline
            .submit(&fp, &cancel, Arc::new(Sma { period: 3 }), &candles)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn submit_propagates_task_errors_without_caching_them() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let candles: Vec<Candle> = [1.0].into_iter().map(candle).collect();
        let fp = Fingerprint(2);

        let err = pipeline
            .submit(&fp, &cancel, Arc::new(Sma { period: 3 }), &candles)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InsufficientData { .. }));
        assert_eq!(pipeline.cache_entry_count(), 0);
    }
}
