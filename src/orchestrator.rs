/// Master process orchestrator (C8, §4.8).
///
/// Grounded on the teacher's `timeframe_status.rs` status-gate pattern
/// ("skip work already marked complete"), generalized from a single
/// per-timeframe flag to a three-step state machine persisted via
/// [[crate::store::ProcessStore]].
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::batch_coordinator::{BatchCoordinator, BatchRequest};
use crate::clock::Clock;
use crate::domain::candle::{Interval, InstrumentKey};
use crate::domain::process::{MasterDataProcess, ProcessStatus, StepStatus};
use crate::error::{EngineError, EngineResult};
use crate::fetcher::{Session, UpstreamFetcher};
use crate::store::{CandleStore, ProcessStore, UniverseStore};

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub bullish: Vec<InstrumentKey>,
    pub bearish: Vec<InstrumentKey>,
    pub metrics: HashMap<String, f64>,
}

/// Runs the filter step against the daily-ingested universe. The concrete
/// ruleset (which indicator thresholds, which comparisons) is a caller
/// concern (§4.8 step 2: "out of scope here is *which* rules").
#[async_trait]
pub trait FilterPipeline: Send + Sync {
    async fn run(&self, universe: &[InstrumentKey]) -> EngineResult<FilterOutcome>;
}

pub struct MasterProcessOrchestrator<F, S, U, P>
where
    F: UpstreamFetcher + 'static,
    S: CandleStore + 'static,
    U: UniverseStore,
    P: ProcessStore,
{
    coordinator: Arc<BatchCoordinator<F, S>>,
    universe_store: Arc<U>,
    process_store: Arc<P>,
    filter_pipeline: Arc<dyn FilterPipeline>,
    clock: Arc<dyn Clock>,
}

impl<F, S, U, P> MasterProcessOrchestrator<F, S, U, P>
where
    F: UpstreamFetcher + 'static,
    S: CandleStore + 'static,
    U: UniverseStore,
    P: ProcessStore,
{
    pub fn new(
        coordinator: Arc<BatchCoordinator<F, S>>,
        universe_store: Arc<U>,
        process_store: Arc<P>,
        filter_pipeline: Arc<dyn FilterPipeline>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        MasterProcessOrchestrator {
            coordinator,
            universe_store,
            process_store,
            filter_pipeline,
            clock,
        }
    }

    /// `RunFilterPipeline` (§6) run standalone, outside `StartProcess`'s
    /// step ordering — e.g. for an ad-hoc re-run against a caller-supplied
    /// subset of the universe.
    pub async fn run_filter_pipeline(&self, universe: &[InstrumentKey]) -> EngineResult<FilterOutcome> {
        self.filter_pipeline.run(universe).await
    }

    pub fn get_process_status(&self, id: &str) -> EngineResult<Option<MasterDataProcess>> {
        self.process_store.get(id)
    }

    pub fn get_process_history(&self, limit: usize) -> EngineResult<Vec<MasterDataProcess>> {
        self.process_store.history(limit)
    }

    /// `StartProcess(date, number_of_past_days)` (§4.8). Idempotent: a
    /// non-terminal or already-terminal process for `date` is returned
    /// as-is rather than duplicated; a fresh process runs steps 1-3 in
    /// strict order, halting in `Failed` on the first step that errors.
    pub async fn start_process(
        &self,
        process_date: NaiveDate,
        number_of_past_days: u32,
        session: &Session,
    ) -> EngineResult<MasterDataProcess> {
        if number_of_past_days == 0 {
            return Err(EngineError::Validation(
                "number_of_past_days must be positive".into(),
            ));
        }

        let mut process = self
            .process_store
            .start_or_get(process_date, number_of_past_days)?;
        if process.is_terminal() {
            return Ok(process);
        }

        let universe = self.universe_store.list_all()?;
        let instrument_keys: Vec<InstrumentKey> =
            universe.iter().map(|m| m.instrument_key.clone()).collect();

        let from = process_date - chrono::Duration::days(number_of_past_days as i64);
        let to = process_date;

        if process.step(0).status == StepStatus::Pending {
            self.run_step(&mut process, 0, || async {
                self.coordinator
                    .process_batch(
                        session,
                        BatchRequest {
                            instrument_keys: instrument_keys.clone(),
                            from_date: from,
                            to_date: to,
                            interval: Interval::Day,
                        },
                    )
                    .await
                    .map(|_| ())
            })
            .await?;
            if process.status == ProcessStatus::Failed {
                return Ok(process);
            }
        }

        let mut shortlist = Vec::new();
        if process.step(1).status == StepStatus::Pending {
            let outcome = self
                .run_step_with_output(&mut process, 1, || async {
                    self.filter_pipeline.run(&instrument_keys).await
                })
                .await?;
            if process.status == ProcessStatus::Failed {
                return Ok(process);
            }
            if let Some(outcome) = outcome {
                shortlist.extend(outcome.bullish);
                shortlist.extend(outcome.bearish);
            }
        }

        if process.step(2).status == StepStatus::Pending {
            self.run_step(&mut process, 2, || async {
                if shortlist.is_empty() {
                    return Ok(());
                }
                self.coordinator
                    .process_batch(
                        session,
                        BatchRequest {
                            instrument_keys: shortlist.clone(),
                            from_date: from,
                            to_date: to,
                            interval: Interval::OneMinute,
                        },
                    )
                    .await
                    .map(|_| ())
            })
            .await?;
        }

        if process.status != ProcessStatus::Failed
            && process.steps.iter().all(|s| s.status == StepStatus::Completed)
        {
            process.status = ProcessStatus::Completed;
            self.process_store.save(&process)?;
        }

        Ok(process)
    }

    async fn run_step<Fut>(
        &self,
        process: &mut MasterDataProcess,
        idx: usize,
        work: impl FnOnce() -> Fut,
    ) -> EngineResult<()>
    where
        Fut: std::future::Future<Output = EngineResult<()>>,
    {
        process.step_mut(idx).status = StepStatus::Running;
        process.step_mut(idx).started_at = Some(self.clock.now());
        self.process_store.save(process)?;

        match work().await {
            Ok(()) => {
                process.step_mut(idx).status = StepStatus::Completed;
                process.step_mut(idx).completed_at = Some(self.clock.now());
            }
            Err(e) => {
                process.step_mut(idx).status = StepStatus::Failed;
                process.step_mut(idx).error_message = Some(e.to_string());
                process.step_mut(idx).completed_at = Some(self.clock.now());
                process.status = ProcessStatus::Failed;
            }
        }
        self.process_store.save(process)?;
        Ok(())
    }

    async fn run_step_with_output<T, Fut>(
        &self,
        process: &mut MasterDataProcess,
        idx: usize,
        work: impl FnOnce() -> Fut,
    ) -> EngineResult<Option<T>>
    where
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        process.step_mut(idx).status = StepStatus::Running;
        process.step_mut(idx).started_at = Some(self.clock.now());
        self.process_store.save(process)?;

        match work().await {
            Ok(output) => {
                process.step_mut(idx).status = StepStatus::Completed;
                process.step_mut(idx).completed_at = Some(self.clock.now());
                self.process_store.save(process)?;
                Ok(Some(output))
            }
            Err(e) => {
                process.step_mut(idx).status = StepStatus::Failed;
                process.step_mut(idx).error_message = Some(e.to_string());
                process.step_mut(idx).completed_at = Some(self.clock.now());
                process.status = ProcessStatus::Failed;
                self.process_store.save(process)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppedClock;
    use crate::domain::InstrumentMeta;
    use crate::fetcher::tests_support::NoopFetcher;
    use crate::store::{SqliteCandleStore, SqliteProcessStore, SqliteUniverseStore};
    use chrono::{TimeZone, Utc};

    struct FailingFilter;

    #[async_trait]
    impl FilterPipeline for FailingFilter {
        async fn run(&self, _universe: &[InstrumentKey]) -> EngineResult<FilterOutcome> {
            Err(EngineError::Internal("filter blew up".into()))
        }
    }

    struct EmptyFilter;

    #[async_trait]
    impl FilterPipeline for EmptyFilter {
        async fn run(&self, _universe: &[InstrumentKey]) -> EngineResult<FilterOutcome> {
            Ok(FilterOutcome::default())
        }
    }

    fn universe_store_with_one_symbol() -> SqliteUniverseStore {
        let store = SqliteUniverseStore::open_in_memory().unwrap();
        store
            .upsert(&InstrumentMeta {
                instrument_key: "NSE_EQ|X".into(),
                symbol: "X".into(),
                exchange: "NSE".into(),
                tick_size: 0.05,
                lot_size: 1,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn step_failure_halts_process_and_preserves_error() {
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::new(NoopFetcher),
            Arc::new(SqliteCandleStore::open_in_memory().unwrap()),
            4,
            4,
        ));
        let orchestrator = MasterProcessOrchestrator::new(
            coordinator,
            Arc::new(universe_store_with_one_symbol()),
            Arc::new(SqliteProcessStore::open_in_memory().unwrap()),
            Arc::new(FailingFilter),
            Arc::new(SteppedClock::new(Utc.with_ymd_and_hms(2025, 1, 22, 0, 0, 0).unwrap())),
        );

        let session = Session { access_token: "tok".into() };
        let date = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();
        let process = orchestrator.start_process(date, 1, &session).await.unwrap();

        assert_eq!(process.status, ProcessStatus::Failed);
        assert_eq!(process.step(0).status, StepStatus::Completed);
        assert_eq!(process.step(1).status, StepStatus::Failed);
        assert_eq!(process.step(2).status, StepStatus::Pending);
        assert!(process.step(1).error_message.is_some());
    }

    #[tokio::test]
    async fn start_process_is_idempotent_for_a_terminal_process() {
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::new(NoopFetcher),
            Arc::new(SqliteCandleStore::open_in_memory().unwrap()),
            4,
            4,
        ));
        let orchestrator = MasterProcessOrchestrator::new(
            coordinator,
            Arc::new(universe_store_with_one_symbol()),
            Arc::new(SqliteProcessStore::open_in_memory().unwrap()),
            Arc::new(EmptyFilter),
            Arc::new(SteppedClock::new(Utc.with_ymd_and_hms(2025, 1, 22, 0, 0, 0).unwrap())),
        );

        let session = Session { access_token: "tok".into() };
        let date = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();
        let first = orchestrator.start_process(date, 1, &session).await.unwrap();
        let second = orchestrator.start_process(date, 1, &session).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, ProcessStatus::Completed);
    }
}
