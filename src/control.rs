/// Control surface (§6): the one type an HTTP layer (out of scope here)
/// calls into. Bundles the batch coordinator, the master process
/// orchestrator, the universe store and the BBW monitor behind the
/// operation names listed in §6 rather than exposing each component
/// separately.
use std::sync::Arc;

use chrono::NaiveDate;

use crate::batch_coordinator::{BatchCoordinator, BatchRequest, BatchSummary};
use crate::bbw::alerts::AlertType;
use crate::bbw::{Alert, BbwDashboardEntry, BbwMonitor};
use crate::domain::candle::InstrumentKey;
use crate::domain::process::MasterDataProcess;
use crate::error::EngineResult;
use crate::fetcher::{Session, UpstreamFetcher};
use crate::orchestrator::{FilterOutcome, MasterProcessOrchestrator};
use crate::store::{CandleStore, ProcessStore, UniverseStore};

pub struct ControlSurface<F, S, U, P>
where
    F: UpstreamFetcher + 'static,
    S: CandleStore + 'static,
    U: UniverseStore,
    P: ProcessStore,
{
    coordinator: Arc<BatchCoordinator<F, S>>,
    orchestrator: Arc<MasterProcessOrchestrator<F, S, U, P>>,
    universe_store: Arc<U>,
    bbw_monitor: Arc<BbwMonitor>,
}

impl<F, S, U, P> ControlSurface<F, S, U, P>
where
    F: UpstreamFetcher + 'static,
    S: CandleStore + 'static,
    U: UniverseStore,
    P: ProcessStore,
{
    pub fn new(
        coordinator: Arc<BatchCoordinator<F, S>>,
        orchestrator: Arc<MasterProcessOrchestrator<F, S, U, P>>,
        universe_store: Arc<U>,
        bbw_monitor: Arc<BbwMonitor>,
    ) -> Self {
        ControlSurface {
            coordinator,
            orchestrator,
            universe_store,
            bbw_monitor,
        }
    }

    pub async fn batch_store_historical(
        &self,
        session: &Session,
        req: BatchRequest,
    ) -> EngineResult<BatchSummary> {
        self.coordinator.process_batch(session, req).await
    }

    /// `instrument_keys = None` runs against the full selected universe.
    pub async fn run_filter_pipeline(
        &self,
        instrument_keys: Option<Vec<InstrumentKey>>,
    ) -> EngineResult<FilterOutcome> {
        let universe = match instrument_keys {
            Some(keys) => keys,
            None => self
                .universe_store
                .list_all()?
                .into_iter()
                .map(|m| m.instrument_key)
                .collect(),
        };
        self.orchestrator.run_filter_pipeline(&universe).await
    }

    pub async fn start_process(
        &self,
        process_date: NaiveDate,
        number_of_past_days: u32,
        session: &Session,
    ) -> EngineResult<MasterDataProcess> {
        self.orchestrator
            .start_process(process_date, number_of_past_days, session)
            .await
    }

    pub fn get_process_status(&self, id: &str) -> EngineResult<Option<MasterDataProcess>> {
        self.orchestrator.get_process_status(id)
    }

    pub fn get_process_history(&self, limit: usize) -> EngineResult<Vec<MasterDataProcess>> {
        self.orchestrator.get_process_history(limit)
    }

    pub fn get_dashboard_data(&self) -> Vec<(InstrumentKey, BbwDashboardEntry)> {
        self.bbw_monitor.dashboard()
    }

    pub fn get_stock_bbw_data(&self, instrument_key: &InstrumentKey) -> Option<BbwDashboardEntry> {
        self.bbw_monitor.dashboard_entry(instrument_key)
    }

    pub fn configure_alerts(&self, alert_threshold: f64, contracting_lookback: u32, enable_alerts: bool) {
        self.bbw_monitor
            .configure(alert_threshold, contracting_lookback, enable_alerts);
    }

    /// Newest-first, optionally narrowed by alert type and/or a substring
    /// match against the instrument key (`symbol` stands in for the
    /// exchange-qualified instrument key, since that's all this core
    /// tracks — a dedicated symbol lookup lives in the universe store).
    pub fn get_alert_history(
        &self,
        limit: usize,
        alert_type: Option<AlertType>,
        symbol: Option<&str>,
    ) -> Vec<Alert> {
        let ring = self.bbw_monitor.alert_ring.lock().unwrap();
        ring.history()
            .rev()
            .filter(|a| alert_type.map_or(true, |t| a.alert_type == t))
            .filter(|a| symbol.map_or(true, |s| a.instrument_key.contains(s)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear_alert_history(&self) {
        self.bbw_monitor.alert_ring.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppedClock;
    use crate::domain::InstrumentMeta;
    use crate::fetcher::tests_support::NoopFetcher;
    use crate::orchestrator::FilterPipeline;
    use crate::store::{SqliteCandleStore, SqliteProcessStore, SqliteUniverseStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    struct EmptyFilter;

    #[async_trait]
    impl FilterPipeline for EmptyFilter {
        async fn run(&self, _universe: &[InstrumentKey]) -> EngineResult<FilterOutcome> {
            Ok(FilterOutcome::default())
        }
    }

    fn surface() -> ControlSurface<NoopFetcher, SqliteCandleStore, SqliteUniverseStore, SqliteProcessStore> {
        let universe_store = Arc::new(SqliteUniverseStore::open_in_memory().unwrap());
        universe_store
            .upsert(&InstrumentMeta {
                instrument_key: "NSE_EQ|X".into(),
                symbol: "X".into(),
                exchange: "NSE".into(),
                tick_size: 0.05,
                lot_size: 1,
            })
            .unwrap();

        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::new(NoopFetcher),
            Arc::new(SqliteCandleStore::open_in_memory().unwrap()),
            4,
            4,
        ));
        let orchestrator = Arc::new(MasterProcessOrchestrator::new(
            Arc::clone(&coordinator),
            Arc::clone(&universe_store),
            Arc::new(SqliteProcessStore::open_in_memory().unwrap()),
            Arc::new(EmptyFilter),
            Arc::new(SteppedClock::new(Utc.with_ymd_and_hms(2025, 1, 22, 0, 0, 0).unwrap())),
        ));
        let bbw_monitor = Arc::new(BbwMonitor::new(
            Default::default(),
            Default::default(),
            HashSet::new(),
        ));

        ControlSurface::new(coordinator, orchestrator, universe_store, bbw_monitor)
    }

    #[tokio::test]
    async fn run_filter_pipeline_defaults_to_the_full_universe() {
        let surface = surface();
        let outcome = surface.run_filter_pipeline(None).await.unwrap();
        assert!(outcome.bullish.is_empty() && outcome.bearish.is_empty());
    }

    #[test]
    fn alert_history_filters_by_type_and_symbol_newest_first() {
        let surface = surface();
        surface.bbw_monitor.update(&"NSE_EQ|A".to_string(), 10.0, Utc.with_ymd_and_hms(2025, 6, 3, 6, 0, 0).unwrap());
        surface.bbw_monitor.update(&"NSE_EQ|A".to_string(), 9.0, Utc.with_ymd_and_hms(2025, 6, 3, 6, 5, 0).unwrap());
        surface.bbw_monitor.update(&"NSE_EQ|A".to_string(), 8.0, Utc.with_ymd_and_hms(2025, 6, 3, 6, 10, 0).unwrap());
        let (_, alert) = surface.bbw_monitor.update(&"NSE_EQ|A".to_string(), 7.0, Utc.with_ymd_and_hms(2025, 6, 3, 6, 15, 0).unwrap());
        assert!(alert.is_some());

        let history = surface.get_alert_history(10, None, Some("NSE_EQ|A"));
        assert_eq!(history.len(), 1);

        let none = surface.get_alert_history(10, None, Some("NSE_EQ|B"));
        assert!(none.is_empty());

        surface.clear_alert_history();
        assert!(surface.get_alert_history(10, None, None).is_empty());
    }
}
