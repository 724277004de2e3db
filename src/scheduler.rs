/// Phase-aligned scheduler (C7, §4.7).
///
/// Grounded on the teacher's `backfill.rs` iteration loop (`loop { ... }`
/// with a per-iteration summary), adapted from "run until exhausted" to
/// "run forever, once per minute, at a phase-aligned offset" and driven
/// through [[crate::clock::Clock]] instead of `Utc::now()` directly so
/// tests can step time deterministically.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{aggregate_5m, bucket_start_5m, is_five_minute_boundary};
use crate::clock::Clock;
use crate::domain::candle::{Candle, Interval, InstrumentKey};
use crate::error::EngineResult;
use crate::fetcher::{Session, UpstreamFetcher};
use crate::store::CandleStore;

const DRIFT_WARN_THRESHOLD_MS: i64 = 500;

/// Invoked once per instrument whose latest 1-minute candle lands on a
/// 5-minute boundary, after the 5-minute candle is persisted (§4.7 step 4:
/// "notify C5/C6"). The indicator pipeline and BBW monitor are wired in by
/// whoever constructs the scheduler; the scheduler itself only drives time.
#[async_trait]
pub trait OnFiveMinuteCandle: Send + Sync {
    async fn handle(&self, instrument: &InstrumentKey, candle: &Candle);
}

pub struct NoopFiveMinuteHook;

#[async_trait]
impl OnFiveMinuteCandle for NoopFiveMinuteHook {
    async fn handle(&self, _instrument: &InstrumentKey, _candle: &Candle) {}
}

fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.hour(), ts.minute(), 0)
        .unwrap()
        .and_utc()
}

/// `next_trigger = floor(now, 1min) + 1min + offset` (§4.7 step 1).
pub fn next_trigger(now: DateTime<Utc>, offset_seconds: u32) -> DateTime<Utc> {
    let offset = offset_seconds.min(59);
    floor_to_minute(now) + chrono::Duration::minutes(1) + chrono::Duration::seconds(offset as i64)
}

pub struct SchedulerConfig {
    pub offset_seconds: u32,
    pub market_open: NaiveTime,
}

pub struct Scheduler<F, S>
where
    F: UpstreamFetcher,
    S: CandleStore,
{
    fetcher: Arc<F>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    hook: Arc<dyn OnFiveMinuteCandle>,
    config: SchedulerConfig,
}

impl<F, S> Scheduler<F, S>
where
    F: UpstreamFetcher,
    S: CandleStore,
{
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        hook: Arc<dyn OnFiveMinuteCandle>,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler {
            fetcher,
            store,
            clock,
            hook,
            config,
        }
    }

    /// One scheduler iteration for a single instrument (§4.7 steps 3-4),
    /// factored out so the real-time loop and tests share one code path.
    pub async fn run_tick(&self, session: &Session, instrument: &InstrumentKey) -> EngineResult<()> {
        let candle = self
            .fetcher
            .get_intraday(session, instrument, Interval::OneMinute)
            .await?;
        let Some(latest) = candle.into_iter().max_by_key(|c| c.timestamp) else {
            return Ok(());
        };

        self.store.upsert(std::slice::from_ref(&latest))?;

        let next_minute = latest.timestamp + chrono::Duration::minutes(1);
        if is_five_minute_boundary(next_minute, self.config.market_open) {
            let window_start = bucket_start_5m(latest.timestamp, self.config.market_open);
            let window = self.store.find_by_range(
                instrument,
                Interval::OneMinute,
                window_start,
                latest.timestamp,
            )?;
            let five_minute = aggregate_5m(&window, self.config.market_open);
            if let Some(bucket) = five_minute.into_iter().find(|c| c.timestamp == window_start) {
                self.store.upsert(std::slice::from_ref(&bucket))?;
                self.hook.handle(instrument, &bucket).await;
            }
        }

        Ok(())
    }

    /// Runs forever, once per minute at the configured offset, until
    /// `cancel` fires (§4.7 step 5). Per-instrument failures are logged
    /// and skipped, not propagated — the loop never exits on them.
    pub async fn run(
        &self,
        session: &Session,
        instruments: &[InstrumentKey],
        cancel: &CancellationToken,
    ) {
        loop {
            let now = self.clock.now();
            let trigger = next_trigger(now, self.config.offset_seconds);
            let wait = (trigger - now).to_std().unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let actual = self.clock.now();
            let drift_ms = (actual - trigger).num_milliseconds();
            if drift_ms.abs() > DRIFT_WARN_THRESHOLD_MS {
                tracing::warn!(drift_ms, "scheduler tick drifted from its intended trigger");
            }

            for instrument in instruments {
                if let Err(e) = self.run_tick(session, instrument).await {
                    tracing::warn!(instrument = %instrument, error = %e, "scheduler tick failed for instrument");
                }
            }

            if cancel.is_cancelled() {
                return;
            }
        }
    }
}
