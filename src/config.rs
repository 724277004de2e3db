/// Surface de configuration reconnue par le moteur (§6).
///
/// Chargement en couches (defaults -> fichier optionnel -> variables
/// d'environnement prefixées `ENGINE_`) via la crate `config`. La structure
/// elle-même vit dans le coeur pour que les tests puissent construire un
/// `EngineConfig::default()` sans toucher le disque — le chargement en
/// couches est une préoccupation de boundary, pas le type lui-même.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalDataConfig {
    pub max_concurrent_requests: usize,
    pub default_interval: String,
    pub batch_size: usize,
    pub batch_window_days: i64,
}

impl Default for HistoricalDataConfig {
    fn default() -> Self {
        HistoricalDataConfig {
            max_concurrent_requests: 5,
            default_interval: "1minute".to_string(),
            batch_size: 1000,
            batch_window_days: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BbwMonitoringConfig {
    pub alert_threshold: f64,
    pub contracting_lookback: u32,
    pub alert_cooldown_seconds: i64,
    pub history_window_days: i64,
    pub trend_lookback: usize,
    pub enable_alerts: bool,
}

impl Default for BbwMonitoringConfig {
    fn default() -> Self {
        BbwMonitoringConfig {
            alert_threshold: 0.1,
            contracting_lookback: 5,
            alert_cooldown_seconds: 900,
            history_window_days: 90,
            trend_lookback: 3,
            enable_alerts: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub exclude_weekends: bool,
    pub open: String,
    pub close: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            exclude_weekends: true,
            open: "09:15".to_string(),
            close: "15:30".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub queue_size: usize,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            max_workers: 8,
            queue_size: 256,
            shutdown_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorCacheConfig {
    pub byte_budget: u64,
    pub ttl_seconds: u64,
}

impl Default for IndicatorCacheConfig {
    fn default() -> Self {
        IndicatorCacheConfig {
            byte_budget: 64 * 1024 * 1024,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorPipelineConfig {
    pub worker_pool: WorkerPoolConfig,
    pub cache: IndicatorCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub historical_data: HistoricalDataConfig,
    pub one_min_candle_ingestion_offset_seconds: u32,
    pub bbw_monitoring: BbwMonitoringConfig,
    pub market: MarketConfig,
    pub indicator_pipeline: IndicatorPipelineConfig,
    pub retention_period_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            historical_data: HistoricalDataConfig::default(),
            one_min_candle_ingestion_offset_seconds: 2,
            bbw_monitoring: BbwMonitoringConfig::default(),
            market: MarketConfig::default(),
            indicator_pipeline: IndicatorPipelineConfig::default(),
            retention_period_days: 365,
        }
    }
}

impl EngineConfig {
    /// Charge la config depuis un fichier optionnel puis l'environnement,
    /// les defaults du crate servant de socle (`config::Config::builder`
    /// l'exige pour que les clés non présentes dans le fichier restent
    /// valides).
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let built = builder
            .add_source(config::Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        Ok(built.try_deserialize()?)
    }
}
