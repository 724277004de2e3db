/// Batch fetch coordinator (C4, §4.4).
///
/// Grounded on the teacher's `backfill.rs` `run_backfill` loop: one task
/// per unit of work, dispatched through `future::join_all`, with per-item
/// outcomes collected afterward rather than the first error aborting the
/// whole batch. The teacher parallelized over timeframes for one symbol;
/// here it's sub-windows across instruments, bounded by a semaphore instead
/// of firing every task unconditionally.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::future;
use tokio::sync::Semaphore;

use crate::domain::{Candle, Interval, InstrumentKey};
use crate::error::EngineError;
use crate::fetcher::{Session, UpstreamFetcher};
use crate::store::CandleStore;

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub instrument_keys: Vec<InstrumentKey>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success { written: usize },
    Skipped,
    Failed { last_error: String },
}

#[derive(Debug, Clone)]
pub struct PerItemStatus {
    pub instrument_key: InstrumentKey,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub per_item_status: Vec<PerItemStatus>,
}

/// Splits `[from, to]` into sub-windows of at most `batch_window_days`,
/// each inclusive of its own bounds (§4.4 step 1).
fn split_windows(from: NaiveDate, to: NaiveDate, batch_window_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let window_end = std::cmp::min(cursor + chrono::Duration::days(batch_window_days - 1), to);
        windows.push((cursor, window_end));
        cursor = window_end + chrono::Duration::days(1);
    }
    windows
}

pub struct BatchCoordinator<F, S>
where
    F: UpstreamFetcher,
    S: CandleStore,
{
    fetcher: Arc<F>,
    store: Arc<S>,
    semaphore: Arc<Semaphore>,
    batch_window_days: i64,
}

impl<F, S> BatchCoordinator<F, S>
where
    F: UpstreamFetcher + 'static,
    S: CandleStore + 'static,
{
    pub fn new(fetcher: Arc<F>, store: Arc<S>, max_concurrent_requests: usize, batch_window_days: i64) -> Self {
        BatchCoordinator {
            fetcher,
            store,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            batch_window_days,
        }
    }

    /// Processes one instrument: dispatches its sub-windows through the
    /// shared semaphore, merges and dedups the results, and upserts the
    /// merged set in one transaction (§4.4 steps 2-3).
    async fn process_instrument(
        &self,
        session: &Session,
        instrument: &InstrumentKey,
        interval: Interval,
        windows: &[(NaiveDate, NaiveDate)],
    ) -> ItemOutcome {
        let mut tasks = Vec::with_capacity(windows.len());
        for &(from, to) in windows {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&self.semaphore);
            let session = session.clone();
            let instrument = instrument.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                fetcher
                    .get_historical(&session, &instrument, interval, from, to)
                    .await
            }));
        }

        let results = future::join_all(tasks).await;

        let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();
        let mut last_error: Option<String> = None;
        for result in results {
            match result {
                Ok(Ok(candles)) => {
                    for c in candles {
                        merged.insert(c.timestamp.timestamp_millis(), c);
                    }
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(join_err) => last_error = Some(format!("task join error: {join_err}")),
            }
        }

        if merged.is_empty() {
            return match last_error {
                Some(err) => ItemOutcome::Failed { last_error: err },
                None => ItemOutcome::Skipped,
            };
        }

        let candles: Vec<Candle> = merged.into_values().collect();
        match self.store.upsert(&candles) {
            Ok(summary) => ItemOutcome::Success { written: summary.written },
            Err(e) => ItemOutcome::Failed { last_error: e.to_string() },
        }
    }

    /// `ProcessBatch` (§4.4): never fails globally on a single item's
    /// failure; aggregates per-instrument outcomes and waits for every
    /// instrument's sub-windows to settle before returning.
    pub async fn process_batch(&self, session: &Session, request: BatchRequest) -> Result<BatchSummary, EngineError> {
        if request.from_date > request.to_date {
            return Err(EngineError::Validation(
                "from_date must not be after to_date".into(),
            ));
        }
        if request.instrument_keys.is_empty() {
            return Err(EngineError::Validation(
                "instrument_keys must not be empty".into(),
            ));
        }

        let windows = split_windows(request.from_date, request.to_date, self.batch_window_days);

        let mut per_instrument = Vec::with_capacity(request.instrument_keys.len());
        for instrument in &request.instrument_keys {
            let outcome = self
                .process_instrument(session, instrument, request.interval, &windows)
                .await;
            per_instrument.push(PerItemStatus {
                instrument_key: instrument.clone(),
                outcome,
            });
        }

        let successful = per_instrument
            .iter()
            .filter(|s| matches!(s.outcome, ItemOutcome::Success { .. }))
            .count();
        let failed = per_instrument
            .iter()
            .filter(|s| matches!(s.outcome, ItemOutcome::Failed { .. }))
            .count();

        Ok(BatchSummary {
            processed: per_instrument.len(),
            successful,
            failed,
            per_item_status: per_instrument,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    #[test]
    fn split_windows_respects_batch_window_days() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let windows = split_windows(from, to, 4);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], (from, from + chrono::Duration::days(3)));
        assert_eq!(windows[2].1, to);
    }

    struct StubFetcher {
        should_fail: bool,
    }

    #[async_trait]
    impl UpstreamFetcher for StubFetcher {
        async fn get_historical(
            &self,
            _session: &Session,
            instrument: &InstrumentKey,
            interval: Interval,
            from: NaiveDate,
            _to: NaiveDate,
        ) -> crate::error::EngineResult<Vec<Candle>> {
            if self.should_fail {
                return Err(EngineError::Transient("stub failure".into()));
            }
            let ts: DateTime<Utc> = from.and_hms_opt(9, 15, 0).unwrap().and_utc();
            Ok(vec![Candle {
                instrument_key: instrument.clone(),
                timestamp: ts,
                interval,
                open: crate::domain::Price::from_f64(10.0),
                high: crate::domain::Price::from_f64(11.0),
                low: crate::domain::Price::from_f64(9.0),
                close: crate::domain::Price::from_f64(10.5),
                volume: 100,
                open_interest: 0,
            }])
        }

        async fn get_intraday(
            &self,
            _session: &Session,
            _instrument: &InstrumentKey,
            _interval: Interval,
        ) -> crate::error::EngineResult<Vec<Candle>> {
            Ok(vec![])
        }

        fn initiate_login(&self) -> (String, String) {
            ("http://example".into(), "state".into())
        }

        async fn handle_callback(&self, _code: &str, _state: &str) -> crate::error::EngineResult<Session> {
            Ok(Session { access_token: "tok".into() })
        }
    }

    #[tokio::test]
    async fn partial_success_is_reported_per_instrument_not_as_global_failure() {
        let fetcher = Arc::new(StubFetcher { should_fail: false });
        let store = Arc::new(crate::store::SqliteCandleStore::open_in_memory().unwrap());
        let coordinator = BatchCoordinator::new(fetcher, store, 4, 4);

        let session = Session { access_token: "tok".into() };
        let request = BatchRequest {
            instrument_keys: vec!["NSE_EQ|A".into(), "NSE_EQ|B".into()],
            from_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
            interval: Interval::OneMinute,
        };

        let summary = coordinator.process_batch(&session, request).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn upstream_failure_is_scoped_to_its_own_instrument() {
        let fetcher = Arc::new(StubFetcher { should_fail: true });
        let store = Arc::new(crate::store::SqliteCandleStore::open_in_memory().unwrap());
        let coordinator = BatchCoordinator::new(fetcher, store, 4, 4);

        let session = Session { access_token: "tok".into() };
        let request = BatchRequest {
            instrument_keys: vec!["NSE_EQ|A".into()],
            from_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            interval: Interval::OneMinute,
        };

        let summary = coordinator.process_batch(&session, request).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.per_item_status[0].outcome,
            ItemOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_inverted_date_range_without_touching_upstream() {
        let fetcher = Arc::new(StubFetcher { should_fail: false });
        let store = Arc::new(crate::store::SqliteCandleStore::open_in_memory().unwrap());
        let coordinator = BatchCoordinator::new(fetcher, store, 4, 4);
        let session = Session { access_token: "tok".into() };

        let request = BatchRequest {
            instrument_keys: vec!["NSE_EQ|A".into()],
            from_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            interval: Interval::OneMinute,
        };

        let err = coordinator.process_batch(&session, request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
