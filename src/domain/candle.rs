/// Types de base du modèle de données: Candle, Interval, Price.
///
/// ARCHITECTURE:
/// Price est un entier fixe-point à deux décimales (centimes) plutôt qu'un
/// f64 — les tests d'idempotence (§8) exigent une égalité octet-à-octet
/// après upsert répété, ce qu'un flottant ne garantit pas pour des sommes
/// et moyennes en cascade (C3/C5).
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Fixed-point price/amount, stored as hundredths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(i64);

impl Price {
    pub const SCALE: i64 = 100;

    pub fn from_cents(cents: i64) -> Self {
        Price(cents)
    }

    pub fn from_f64(value: f64) -> Self {
        Price((value * Self::SCALE as f64).round() as i64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn cents(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.as_f64())
    }
}

impl std::ops::Add for Price {
    type Output = Price;
    fn add(self, rhs: Price) -> Price {
        Price(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Price {
    type Output = Price;
    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

/// Interval supported by the candle store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMinute,
    FiveMinute,
    Day,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1minute",
            Interval::FiveMinute => "5minute",
            Interval::Day => "day",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "1minute" => Some(Interval::OneMinute),
            "5minute" => Some(Interval::FiveMinute),
            "day" => Some(Interval::Day),
            _ => None,
        }
    }

    /// Durée de l'intervalle, utilisée pour le floor de timestamp.
    pub fn duration(self) -> chrono::Duration {
        match self {
            Interval::OneMinute => chrono::Duration::minutes(1),
            Interval::FiveMinute => chrono::Duration::minutes(5),
            Interval::Day => chrono::Duration::days(1),
        }
    }
}

/// Opaque instrument identifier at the upstream broker, e.g. "NSE_EQ|INE348A01023".
pub type InstrumentKey = String;

/// OHLCV record, identity = (instrument_key, timestamp, interval).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_key: InstrumentKey,
    pub timestamp: DateTime<Utc>,
    pub interval: Interval,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: u64,
    pub open_interest: u64,
}

impl Candle {
    /// Validates the OHLCV invariants from §3. Rejected before persistence.
    pub fn validate(&self) -> EngineResult<()> {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        if self.low > lo {
            return Err(EngineError::Validation(format!(
                "low {} exceeds min(open, close) {}",
                self.low, lo
            )));
        }
        if hi > self.high {
            return Err(EngineError::Validation(format!(
                "max(open, close) {} exceeds high {}",
                hi, self.high
            )));
        }
        if self.low > self.high {
            return Err(EngineError::Validation(format!(
                "low {} exceeds high {}",
                self.low, self.high
            )));
        }
        Ok(())
    }

    /// Floors `timestamp` to its interval boundary (floor semantics, §3).
    pub fn floor_timestamp(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
        match interval {
            Interval::OneMinute => ts
                .date_naive()
                .and_hms_opt(ts.hour(), ts.minute(), 0)
                .unwrap()
                .and_utc(),
            Interval::FiveMinute => {
                let floored_minute = (ts.minute() / 5) * 5;
                ts.date_naive()
                    .and_hms_opt(ts.hour(), floored_minute, 0)
                    .unwrap()
                    .and_utc()
            }
            Interval::Day => ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
        }
    }
}

/// Derived, lazily-populated indicator projection attached to the latest
/// 5-minute candle row (§3, Candle5Min). Not authoritative history — the
/// indicator pipeline (C5) and BBW monitor (C6) own the real state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candle5MinProjection {
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_width_normalized: Option<f64>,
    pub ema_5: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub vwap: Option<f64>,
    pub ma_9: Option<f64>,
    pub lowest_bb_width: Option<f64>,
    pub candles_in_range_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            instrument_key: "NSE_EQ|X".into(),
            timestamp: Utc::now(),
            interval: Interval::OneMinute,
            open: Price::from_f64(o),
            high: Price::from_f64(h),
            low: Price::from_f64(l),
            close: Price::from_f64(c),
            volume: 100,
            open_interest: 0,
        }
    }

    #[test]
    fn validates_well_formed_candle() {
        assert!(candle(10.0, 12.0, 9.0, 11.0).validate().is_ok());
    }

    #[test]
    fn rejects_low_above_open_close_min() {
        assert!(candle(10.0, 12.0, 10.5, 11.0).validate().is_err());
    }

    #[test]
    fn rejects_high_below_open_close_max() {
        assert!(candle(10.0, 10.5, 9.0, 11.0).validate().is_err());
    }

    #[test]
    fn price_round_trips_through_cents() {
        let p = Price::from_f64(123.45);
        assert_eq!(p.cents(), 12345);
        assert_eq!(p.as_f64(), 123.45);
    }
}
