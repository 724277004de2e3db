/// Aggregator (C3, §4.3).
///
/// ALGORITHME (5 minutes):
/// 1. Partitionne les bougies 1 minute en buckets keyés par
///    `floor(ts, 5min)` à partir de l'ouverture du marché.
/// 2. Un bucket complet (5 bougies) produit: open=first.open,
///    close=last.close, high=max(high), low=min(low), volume=sum(volume),
///    open_interest=last.open_interest.
/// 3. Un bucket incomplet n'est jamais émis.
///
/// L'agrégateur ne relit jamais sa propre sortie: ré-agréger une fenêtre
/// déjà agrégée produit une sortie identique (idempotence, §8).
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{Candle, Interval};

/// A 1-minute timestamp `t` is a 5-minute boundary iff `(t - market_open)`
/// is a nonnegative multiple of 5 minutes.
pub fn is_five_minute_boundary(ts: DateTime<Utc>, market_open: NaiveTime) -> bool {
    let minutes_since_open = minutes_since_market_open(ts, market_open);
    minutes_since_open >= 0 && minutes_since_open % 5 == 0
}

fn minutes_since_market_open(ts: DateTime<Utc>, market_open: NaiveTime) -> i64 {
    let open_today = ts.date_naive().and_time(market_open).and_utc();
    (ts - open_today).num_minutes()
}

/// Start of the 5-minute bucket containing `ts` (§4.3 step 1's bucket key),
/// exposed so callers can identify a completed bucket's window without
/// re-deriving the flooring arithmetic.
pub fn bucket_start_5m(ts: DateTime<Utc>, market_open: NaiveTime) -> DateTime<Utc> {
    bucket_start(ts, market_open)
}

fn bucket_start(ts: DateTime<Utc>, market_open: NaiveTime) -> DateTime<Utc> {
    let minutes_since_open = minutes_since_market_open(ts, market_open);
    let floored = (minutes_since_open.div_euclid(5)) * 5;
    ts.date_naive().and_time(market_open).and_utc() + chrono::Duration::minutes(floored)
}

/// Aggregates a 1-minute candle stream into completed 5-minute candles.
/// Incomplete trailing buckets (fewer than 5 candles) are never emitted.
pub fn aggregate_5m(one_minute: &[Candle], market_open: NaiveTime) -> Vec<Candle> {
    aggregate_bucketed(one_minute, 5, |ts| bucket_start(ts, market_open))
}

/// Aggregates a 1-minute candle stream into completed daily candles, keyed
/// by calendar date. A full session is assumed to contain 375 one-minute
/// candles (09:15-15:30); any other bucket size is treated as partial and
/// not emitted, matching the 5-minute rule's "never emit incomplete" stance.
pub fn aggregate_daily(one_minute: &[Candle], session_minutes: usize) -> Vec<Candle> {
    aggregate_bucketed(one_minute, session_minutes, |ts| {
        ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
    })
}

fn aggregate_bucketed(
    one_minute: &[Candle],
    bucket_size: usize,
    key_fn: impl Fn(DateTime<Utc>) -> DateTime<Utc>,
) -> Vec<Candle> {
    if one_minute.is_empty() || bucket_size == 0 {
        return Vec::new();
    }

    let target_interval = if bucket_size == 5 {
        Interval::FiveMinute
    } else {
        Interval::Day
    };

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Candle>> = BTreeMap::new();
    for candle in one_minute {
        buckets.entry(key_fn(candle.timestamp)).or_default().push(candle);
    }

    let mut out = Vec::new();
    for (bucket_ts, mut members) in buckets {
        if members.len() < bucket_size {
            continue; // incomplete bucket: never emitted (§4.3)
        }
        members.sort_by_key(|c| c.timestamp);

        let open = members.first().unwrap().open;
        let close = members.last().unwrap().close;
        let high = members.iter().map(|c| c.high).max().unwrap();
        let low = members.iter().map(|c| c.low).min().unwrap();
        let volume: u64 = members.iter().map(|c| c.volume).sum();
        let open_interest = members.last().unwrap().open_interest;
        let instrument_key = members.first().unwrap().instrument_key.clone();

        out.push(Candle {
            instrument_key,
            timestamp: bucket_ts,
            interval: target_interval,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Price;
    use chrono::TimeZone;

    fn minute_candle(minute_offset: i64, close: f64) -> Candle {
        let ts = Utc
            .with_ymd_and_hms(2025, 6, 1, 9, 15, 0)
            .unwrap()
            + chrono::Duration::minutes(minute_offset);
        Candle {
            instrument_key: "NSE_EQ|X".into(),
            timestamp: ts,
            interval: Interval::OneMinute,
            open: Price::from_f64(close - 0.5),
            high: Price::from_f64(close + 1.0),
            low: Price::from_f64(close - 1.0),
            close: Price::from_f64(close),
            volume: 10,
            open_interest: 0,
        }
    }

    fn market_open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).unwrap()
    }

    #[test]
    fn boundary_test_matches_spec_examples() {
        let open = market_open();
        assert!(is_five_minute_boundary(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 15, 0).unwrap(),
            open
        ));
        assert!(is_five_minute_boundary(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 20, 0).unwrap(),
            open
        ));
        assert!(!is_five_minute_boundary(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 17, 0).unwrap(),
            open
        ));
    }

    #[test]
    fn incomplete_bucket_emits_nothing() {
        let candles: Vec<_> = (0..3).map(|i| minute_candle(i, 100.0 + i as f64)).collect();
        assert!(aggregate_5m(&candles, market_open()).is_empty());
    }

    #[test]
    fn completing_bucket_emits_exactly_one_candle() {
        let mut candles: Vec<_> = (0..3).map(|i| minute_candle(i, 100.0 + i as f64)).collect();
        candles.extend((3..5).map(|i| minute_candle(i, 100.0 + i as f64)));

        let out = aggregate_5m(&candles, market_open());
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.open, Price::from_f64(99.5));
        assert_eq!(c.close, Price::from_f64(104.0));
        assert_eq!(c.volume, 50);
        assert_eq!(c.timestamp, candles[0].timestamp);
    }

    #[test]
    fn reaggregating_same_input_is_idempotent() {
        let candles: Vec<_> = (0..5).map(|i| minute_candle(i, 100.0 + i as f64)).collect();
        let first = aggregate_5m(&candles, market_open());
        let second = aggregate_5m(&candles, market_open());
        assert_eq!(first, second);
    }

    #[test]
    fn insufficient_span_returns_empty_not_error() {
        assert!(aggregate_5m(&[], market_open()).is_empty());
    }
}
