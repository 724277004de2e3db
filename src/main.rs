/// CLI entrypoint wiring config, stores, fetcher, scheduler and the
/// orchestrator behind the control surface (§6).
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use market_data_engine::batch_coordinator::{BatchCoordinator, BatchRequest};
use market_data_engine::bbw::BbwMonitor;
use market_data_engine::clock::SystemClock;
use market_data_engine::config::EngineConfig;
use market_data_engine::control::ControlSurface;
use market_data_engine::domain::candle::{Interval, InstrumentKey};
use market_data_engine::error::EngineResult;
use market_data_engine::fetcher::{HttpUpstreamFetcher, Session, UpstreamFetcher};
use market_data_engine::indicators::sma::Sma;
use market_data_engine::orchestrator::{FilterOutcome, FilterPipeline, MasterProcessOrchestrator};
use market_data_engine::scheduler::{NoopFiveMinuteHook, Scheduler, SchedulerConfig};
use market_data_engine::store::{
    CandleStore, SqliteCandleStore, SqliteProcessStore, SqliteUniverseStore, UniverseStore,
};

const CANDLE_DB_FILE: &str = "candles.db";
const PROCESS_DB_FILE: &str = "processes.db";
const UNIVERSE_DB_FILE: &str = "universe.db";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional config file layered over the built-in defaults.
    #[arg(short, long)]
    config: Option<String>,

    /// Upstream broker base URL.
    #[arg(long, default_value = "https://broker.example.com")]
    broker_url: String,

    /// Bearer token for the upstream session. A real deployment would run
    /// the OAuth2 flow via `UpstreamFetcher::initiate_login`/`handle_callback`.
    #[arg(long, env = "ENGINE_ACCESS_TOKEN", default_value = "")]
    access_token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the phase-aligned scheduler loop forever (§4.7).
    Run,
    /// `BatchStoreHistorical` (§6).
    BatchStoreHistorical {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, value_enum)]
        interval: CliInterval,
        #[arg(long, value_delimiter = ',')]
        instruments: Vec<String>,
    },
    /// `StartProcess` (§6).
    StartProcess {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 30)]
        number_of_past_days: u32,
    },
    /// `GetProcessStatus` (§6).
    GetProcessStatus { id: String },
    /// `GetProcessHistory` (§6).
    GetProcessHistory {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// `GetDashboardData` (§6).
    GetDashboardData,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CliInterval {
    Day,
    OneMinute,
    FiveMinute,
}

impl From<CliInterval> for Interval {
    fn from(v: CliInterval) -> Self {
        match v {
            CliInterval::Day => Interval::Day,
            CliInterval::OneMinute => Interval::OneMinute,
            CliInterval::FiveMinute => Interval::FiveMinute,
        }
    }
}

/// Ad-hoc ruleset: bullish if the latest close is above its SMA(20),
/// bearish otherwise. The concrete ruleset is a caller concern (§4.8 step
/// 2); this is the CLI's own choice, not part of the core.
struct SmaCrossoverFilter {
    store: Arc<SqliteCandleStore>,
}

#[async_trait]
impl FilterPipeline for SmaCrossoverFilter {
    async fn run(&self, universe: &[InstrumentKey]) -> EngineResult<FilterOutcome> {
        let sma20 = Sma { period: 20 };
        let mut outcome = FilterOutcome::default();

        for instrument in universe {
            let candles = self.store.get_n_latest(instrument, Interval::Day, 60)?;
            if candles.len() < 20 {
                continue;
            }
            let closes: Vec<f64> = candles.iter().rev().map(|c| c.close.as_f64()).collect();
            let Ok(series) = sma20.compute(&closes) else {
                continue;
            };
            let last_sma = *series.last().expect("non-empty on Ok");
            let last_close = *closes.last().expect("checked len >= 20");

            if last_close >= last_sma {
                outcome.bullish.push(instrument.clone());
            } else {
                outcome.bearish.push(instrument.clone());
            }
        }
        Ok(outcome)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref()).context("loading engine config")?;

    let fetcher = Arc::new(HttpUpstreamFetcher::new(
        args.broker_url.clone(),
        config.historical_data.max_concurrent_requests,
    ));
    let candle_store = Arc::new(
        SqliteCandleStore::new(CANDLE_DB_FILE).context("opening candle store")?,
    );
    let universe_store = Arc::new(
        SqliteUniverseStore::new(UNIVERSE_DB_FILE).context("opening universe store")?,
    );
    let process_store = Arc::new(
        SqliteProcessStore::new(PROCESS_DB_FILE).context("opening process store")?,
    );
    let clock = Arc::new(SystemClock);
    let session = Session {
        access_token: args.access_token.clone(),
    };

    let coordinator = Arc::new(BatchCoordinator::new(
        Arc::clone(&fetcher),
        Arc::clone(&candle_store),
        config.historical_data.max_concurrent_requests,
        config.historical_data.batch_window_days,
    ));
    let filter_pipeline: Arc<dyn FilterPipeline> = Arc::new(SmaCrossoverFilter {
        store: Arc::clone(&candle_store),
    });
    let orchestrator = Arc::new(MasterProcessOrchestrator::new(
        Arc::clone(&coordinator),
        Arc::clone(&universe_store),
        Arc::clone(&process_store),
        filter_pipeline,
        Arc::clone(&clock) as Arc<dyn market_data_engine::clock::Clock>,
    ));
    let bbw_monitor = Arc::new(BbwMonitor::new(
        config.bbw_monitoring.clone(),
        config.market.clone(),
        HashSet::new(),
    ));
    let control = ControlSurface::new(
        Arc::clone(&coordinator),
        Arc::clone(&orchestrator),
        Arc::clone(&universe_store),
        Arc::clone(&bbw_monitor),
    );

    match args.command {
        Command::Run => {
            let universe = universe_store.list_all()?;
            let instruments: Vec<InstrumentKey> =
                universe.into_iter().map(|m| m.instrument_key).collect();

            let scheduler = Scheduler::new(
                fetcher,
                candle_store,
                clock as Arc<dyn market_data_engine::clock::Clock>,
                Arc::new(NoopFiveMinuteHook),
                SchedulerConfig {
                    offset_seconds: config.one_min_candle_ingestion_offset_seconds,
                    market_open: chrono::NaiveTime::parse_from_str(&config.market.open, "%H:%M")
                        .unwrap_or_else(|_| chrono::NaiveTime::from_hms_opt(9, 15, 0).unwrap()),
                },
            );

            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
            });

            tracing::info!(count = instruments.len(), "starting scheduler loop");
            scheduler.run(&session, &instruments, &cancel).await;
        }
        Command::BatchStoreHistorical {
            from,
            to,
            interval,
            instruments,
        } => {
            let instrument_keys = if instruments.is_empty() {
                universe_store
                    .list_all()?
                    .into_iter()
                    .map(|m| m.instrument_key)
                    .collect()
            } else {
                instruments
            };
            let summary = control
                .batch_store_historical(
                    &session,
                    BatchRequest {
                        instrument_keys,
                        from_date: from,
                        to_date: to,
                        interval: interval.into(),
                    },
                )
                .await?;
            println!(
                "processed={} successful={} failed={}",
                summary.processed, summary.successful, summary.failed
            );
            for item in summary.per_item_status {
                println!("  {}: {:?}", item.instrument_key, item.outcome);
            }
        }
        Command::StartProcess {
            date,
            number_of_past_days,
        } => {
            let process = control.start_process(date, number_of_past_days, &session).await?;
            println!("process {} status={:?}", process.id, process.status);
        }
        Command::GetProcessStatus { id } => match control.get_process_status(&id)? {
            Some(process) => println!("{process:#?}"),
            None => println!("no such process: {id}"),
        },
        Command::GetProcessHistory { limit } => {
            for process in control.get_process_history(limit)? {
                println!("{} {:?} ({})", process.id, process.status, process.process_date);
            }
        }
        Command::GetDashboardData => {
            for (instrument, entry) in control.get_dashboard_data() {
                println!(
                    "{instrument}: width={:.4} min={:.4} dist%={:.2} trend={:?} alert={:?}",
                    entry.current_bb_width,
                    entry.historical_min_bb_width,
                    entry.distance_from_min_percent,
                    entry.bb_width_trend,
                    entry.alert_type
                );
            }
        }
    }

    Ok(())
}
