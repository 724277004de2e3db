/// BBW monitor (C6, §4.6): per-instrument rolling Bollinger-Band-Width
/// state and squeeze-alert detection.
///
/// Grounded on the teacher's `realtime.rs` cache-plus-broadcast shape
/// (`Arc<RwLock<HashMap<StreamKey, RealtimeCandle>>>` + a broadcast sender),
/// generalized to per-instrument sharded locking via `dashmap` so updates to
/// different instruments never contend, and with `AlertBus`
/// ([[alerts]]) standing in for the teacher's `broadcast_tx`.
use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Asia::Kolkata;
use dashmap::DashMap;

use crate::bbw::alerts::{Alert, AlertBus, AlertRing, AlertType};
use crate::config::{BbwMonitoringConfig, MarketConfig};
use crate::domain::InstrumentKey;

const MIN_WIDTH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbwTrend {
    Contracting,
    Expanding,
    Stable,
}

#[derive(Debug, Clone)]
pub struct BbwDashboardEntry {
    pub current_bb_width: f64,
    pub historical_min_bb_width: f64,
    pub distance_from_min_percent: f64,
    pub contracting_sequence_count: u32,
    pub bb_width_trend: BbwTrend,
    pub alert_triggered: bool,
    pub alert_type: Option<AlertType>,
    pub last_updated: DateTime<Utc>,
}

struct BbwState {
    width_history: VecDeque<(DateTime<Utc>, f64)>,
    contracting_sequence_count: u32,
    last_alert_fired: HashMap<AlertType, DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    last_dashboard: Option<BbwDashboardEntry>,
}

impl BbwState {
    fn new(at: DateTime<Utc>) -> Self {
        BbwState {
            width_history: VecDeque::new(),
            contracting_sequence_count: 0,
            last_alert_fired: HashMap::new(),
            last_updated: at,
            last_dashboard: None,
        }
    }
}

pub struct BbwMonitor {
    states: DashMap<InstrumentKey, BbwState>,
    pub alert_ring: std::sync::Mutex<AlertRing>,
    pub alert_bus: AlertBus,
    config: std::sync::RwLock<BbwMonitoringConfig>,
    market: MarketConfig,
    holidays: HashSet<NaiveDate>,
}

impl BbwMonitor {
    pub fn new(config: BbwMonitoringConfig, market: MarketConfig, holidays: HashSet<NaiveDate>) -> Self {
        BbwMonitor {
            states: DashMap::new(),
            alert_ring: std::sync::Mutex::new(AlertRing::new(4096)),
            alert_bus: AlertBus::new(1024),
            config: std::sync::RwLock::new(config),
            market,
            holidays,
        }
    }

    /// `ConfigureAlerts` (§6): updates thresholds at runtime without a
    /// restart. Takes effect on the next `update` call.
    pub fn configure(&self, alert_threshold: f64, contracting_lookback: u32, enable_alerts: bool) {
        let mut config = self.config.write().unwrap();
        config.alert_threshold = alert_threshold;
        config.contracting_lookback = contracting_lookback;
        config.enable_alerts = enable_alerts;
    }

    fn is_market_hours(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&Kolkata);
        if self.market.exclude_weekends {
            let weekday = local.weekday();
            if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
                return false;
            }
        }
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }

        let parse_hm = |s: &str| -> Option<(u32, u32)> {
            let mut parts = s.split(':');
            let h: u32 = parts.next()?.parse().ok()?;
            let m: u32 = parts.next()?.parse().ok()?;
            Some((h, m))
        };
        let (open_h, open_m) = parse_hm(&self.market.open).unwrap_or((9, 15));
        let (close_h, close_m) = parse_hm(&self.market.close).unwrap_or((15, 30));

        let minutes_since_midnight = local.hour() * 60 + local.minute();
        let open_minutes = open_h * 60 + open_m;
        let close_minutes = close_h * 60 + close_m;
        minutes_since_midnight >= open_minutes && minutes_since_midnight <= close_minutes
    }

    fn trend(widths: &[f64], lookback: usize) -> BbwTrend {
        if widths.len() < lookback || lookback < 2 {
            return BbwTrend::Stable;
        }
        let window = &widths[widths.len() - lookback..];
        if window.windows(2).all(|w| w[1] < w[0]) {
            BbwTrend::Contracting
        } else if window.windows(2).all(|w| w[1] > w[0]) {
            BbwTrend::Expanding
        } else {
            BbwTrend::Stable
        }
    }

    /// Updates rolling state for `instrument` with a new 5-minute BBW
    /// reading and, market hours permitting, returns at most one alert
    /// (§4.6). Always updates state, even outside trading hours.
    pub fn update(
        &self,
        instrument: &InstrumentKey,
        bb_width: f64,
        at: DateTime<Utc>,
    ) -> (BbwDashboardEntry, Option<Alert>) {
        let config = self.config.read().unwrap().clone();
        let mut entry = self
            .states
            .entry(instrument.clone())
            .or_insert_with(|| BbwState::new(at));

        let cutoff = at - chrono::Duration::days(config.history_window_days);
        while entry
            .width_history
            .front()
            .map(|(ts, _)| *ts < cutoff)
            .unwrap_or(false)
        {
            entry.width_history.pop_front();
        }

        let previous_width = entry.width_history.back().map(|(_, w)| *w);
        entry.width_history.push_back((at, bb_width));
        entry.last_updated = at;

        entry.contracting_sequence_count = match previous_width {
            Some(prev) if bb_width < prev => entry.contracting_sequence_count + 1,
            _ => 1,
        };

        let historical_min = entry
            .width_history
            .iter()
            .map(|(_, w)| *w)
            .fold(f64::INFINITY, f64::min)
            .max(MIN_WIDTH_EPSILON);

        let widths: Vec<f64> = entry.width_history.iter().map(|(_, w)| *w).collect();
        let bb_width_trend = Self::trend(&widths, config.trend_lookback);

        let distance_from_min_percent = 100.0 * (bb_width - historical_min) / historical_min;

        let threshold_met = distance_from_min_percent <= config.alert_threshold;
        let pattern_met = entry.contracting_sequence_count >= config.contracting_lookback;
        let lookback = config.contracting_lookback as usize;
        let squeeze_met = threshold_met
            && pattern_met
            && widths.len() >= lookback
            && widths[widths.len() - lookback..]
                .iter()
                .all(|w| bb_width <= *w);

        let alert_type = if squeeze_met {
            Some(AlertType::Squeeze)
        } else if pattern_met {
            Some(AlertType::Pattern)
        } else if threshold_met {
            Some(AlertType::Threshold)
        } else {
            None
        };

        let mut dashboard = BbwDashboardEntry {
            current_bb_width: bb_width,
            historical_min_bb_width: historical_min,
            distance_from_min_percent,
            contracting_sequence_count: entry.contracting_sequence_count,
            bb_width_trend,
            alert_triggered: false,
            alert_type: None,
            last_updated: at,
        };

        let can_alert = config.enable_alerts && self.is_market_hours(at);
        let fired = alert_type.filter(|_| can_alert).and_then(|alert_type| {
            let cooldown = chrono::Duration::seconds(config.alert_cooldown_seconds);
            if let Some(last_fired) = entry.last_alert_fired.get(&alert_type) {
                if at - *last_fired < cooldown {
                    return None;
                }
            }
            entry.last_alert_fired.insert(alert_type, at);

            let alert = Alert {
                instrument_key: instrument.clone(),
                alert_type,
                current_bb_width: bb_width,
                distance_from_min_percent,
                pattern_length: matches!(alert_type, AlertType::Pattern | AlertType::Squeeze)
                    .then_some(entry.contracting_sequence_count),
                fired_at: at,
            };
            self.alert_ring.lock().unwrap().push(alert.clone());
            self.alert_bus.publish(alert.clone());
            Some(alert)
        });

        if let Some(alert) = &fired {
            dashboard.alert_triggered = true;
            dashboard.alert_type = Some(alert.alert_type);
        }

        entry.last_dashboard = Some(dashboard.clone());
        (dashboard, fired)
    }

    /// `GetStockBBWData` (§6): the most recently computed dashboard entry
    /// for `instrument`, without forcing a new reading.
    pub fn dashboard_entry(&self, instrument: &InstrumentKey) -> Option<BbwDashboardEntry> {
        self.states.get(instrument).and_then(|s| s.last_dashboard.clone())
    }

    /// `GetDashboardData` (§6): a snapshot across every instrument with at
    /// least one recorded update.
    pub fn dashboard(&self) -> Vec<(InstrumentKey, BbwDashboardEntry)> {
        self.states
            .iter()
            .filter_map(|entry| entry.last_dashboard.clone().map(|d| (entry.key().clone(), d)))
            .collect()
    }

    pub fn reset(&self, instrument: &InstrumentKey) {
        self.states.remove(instrument);
    }
}
