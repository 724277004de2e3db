/// Candle store (C1, §4.1).
///
/// ARCHITECTURE:
/// SQLite via rusqlite, une connexion par `SqliteCandleStore`, protégée par
/// un mutex grossier — le teacher n'avait qu'un writer à la fois de toute
/// façon (retriever.rs::insert_batch); ici on garde ce choix mais le
/// documente comme une limite explicite plutôt qu'un oubli: des writers
/// sur des (instrument, interval) disjoints ne se bloquent pas au niveau
/// logique, seulement au niveau de la connexion physique.
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::domain::{Candle, Interval, InstrumentKey, Price};
use crate::error::{EngineError, EngineResult};

pub struct UpsertSummary {
    pub written: usize,
}

/// `GetDateRange` (§4.1): the span of stored candles for one
/// `(instrument, interval)`, and whether any exist at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub exists: bool,
}

/// Contract implemented by any backing store for candles (§4.1).
pub trait CandleStore: Send + Sync {
    fn upsert(&self, candles: &[Candle]) -> EngineResult<UpsertSummary>;
    fn find_by_range(
        &self,
        instrument: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Candle>>;
    fn get_latest(&self, instrument: &str, interval: Interval) -> EngineResult<Option<Candle>>;
    fn get_earliest(&self, instrument: &str, interval: Interval) -> EngineResult<Option<Candle>>;
    fn get_n_latest(
        &self,
        instrument: &str,
        interval: Interval,
        n: usize,
    ) -> EngineResult<Vec<Candle>>;
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<usize>;

    /// Composes `get_earliest`/`get_latest`; no backing store needs its own
    /// query for this.
    fn get_date_range(&self, instrument: &str, interval: Interval) -> EngineResult<DateRange> {
        let earliest = self.get_earliest(instrument, interval)?.map(|c| c.timestamp);
        let latest = self.get_latest(instrument, interval)?.map(|c| c.timestamp);
        Ok(DateRange {
            exists: earliest.is_some(),
            earliest,
            latest,
        })
    }
}

pub struct SqliteCandleStore {
    conn: Mutex<Connection>,
}

impl SqliteCandleStore {
    pub fn new(db_file: &str) -> EngineResult<Self> {
        let conn = Connection::open(db_file)
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteCandleStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteCandleStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS candles (
                instrument_key TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                open INTEGER NOT NULL,
                high INTEGER NOT NULL,
                low INTEGER NOT NULL,
                close INTEGER NOT NULL,
                volume INTEGER NOT NULL,
                open_interest INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                UNIQUE(instrument_key, interval, timestamp_ms)
            )",
            [],
        )
        .map_err(|e| EngineError::Internal(format!("init schema: {e}")))?;
        Ok(())
    }

    fn row_to_candle(
        instrument_key: InstrumentKey,
        interval: Interval,
        timestamp_ms: i64,
        open: i64,
        high: i64,
        low: i64,
        close: i64,
        volume: i64,
        open_interest: i64,
    ) -> Candle {
        Candle {
            instrument_key,
            timestamp: DateTime::from_timestamp_millis(timestamp_ms).unwrap(),
            interval,
            open: Price::from_cents(open),
            high: Price::from_cents(high),
            low: Price::from_cents(low),
            close: Price::from_cents(close),
            volume: volume.max(0) as u64,
            open_interest: open_interest.max(0) as u64,
        }
    }
}

impl CandleStore for SqliteCandleStore {
    /// Batched upsert. On conflict (same identity tuple) overwrites OHLCV
    /// but preserves `created_at`; atomic per batch — a validation failure
    /// anywhere in the batch leaves the store unchanged for that batch.
    fn upsert(&self, candles: &[Candle]) -> EngineResult<UpsertSummary> {
        for c in candles {
            c.validate()?;
        }

        let mut conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("begin tx: {e}")))?;
        let mut written = 0usize;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO candles (
                        instrument_key, interval, timestamp_ms, open, high, low, close,
                        volume, open_interest, created_at_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(instrument_key, interval, timestamp_ms) DO UPDATE SET
                        open = excluded.open,
                        high = excluded.high,
                        low = excluded.low,
                        close = excluded.close,
                        volume = excluded.volume,
                        open_interest = excluded.open_interest",
                )
                .map_err(|e| EngineError::Internal(format!("prepare upsert: {e}")))?;

            let now_ms = Utc::now().timestamp_millis();
            for c in candles {
                stmt.execute(params![
                    c.instrument_key,
                    c.interval.as_str(),
                    c.timestamp.timestamp_millis(),
                    c.open.cents(),
                    c.high.cents(),
                    c.low.cents(),
                    c.close.cents(),
                    c.volume as i64,
                    c.open_interest as i64,
                    now_ms,
                ])
                .map_err(|e| EngineError::Internal(format!("upsert candle: {e}")))?;
                written += 1;
            }
        }

        tx.commit()
            .map_err(|e| EngineError::Internal(format!("commit tx: {e}")))?;
        Ok(UpsertSummary { written })
    }

    fn find_by_range(
        &self,
        instrument: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Candle>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp_ms, open, high, low, close, volume, open_interest
                 FROM candles
                 WHERE instrument_key = ?1 AND interval = ?2
                   AND timestamp_ms >= ?3 AND timestamp_ms <= ?4
                 ORDER BY timestamp_ms ASC",
            )
            .map_err(|e| EngineError::Internal(format!("prepare range query: {e}")))?;

        let rows = stmt
            .query_map(
                params![
                    instrument,
                    interval.as_str(),
                    from.timestamp_millis(),
                    to.timestamp_millis()
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .map_err(|e| EngineError::Internal(format!("run range query: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume, oi) =
                row.map_err(|e| EngineError::Internal(format!("read row: {e}")))?;
            out.push(Self::row_to_candle(
                instrument.to_string(),
                interval,
                ts,
                open,
                high,
                low,
                close,
                volume,
                oi,
            ));
        }
        Ok(out)
    }

    fn get_latest(&self, instrument: &str, interval: Interval) -> EngineResult<Option<Candle>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT timestamp_ms, open, high, low, close, volume, open_interest
             FROM candles WHERE instrument_key = ?1 AND interval = ?2
             ORDER BY timestamp_ms DESC LIMIT 1",
            params![instrument, interval.as_str()],
            |row| {
                Ok(Self::row_to_candle(
                    instrument.to_string(),
                    interval,
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| EngineError::Internal(format!("get_latest: {e}")))
    }

    fn get_earliest(&self, instrument: &str, interval: Interval) -> EngineResult<Option<Candle>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT timestamp_ms, open, high, low, close, volume, open_interest
             FROM candles WHERE instrument_key = ?1 AND interval = ?2
             ORDER BY timestamp_ms ASC LIMIT 1",
            params![instrument, interval.as_str()],
            |row| {
                Ok(Self::row_to_candle(
                    instrument.to_string(),
                    interval,
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| EngineError::Internal(format!("get_earliest: {e}")))
    }

    fn get_n_latest(
        &self,
        instrument: &str,
        interval: Interval,
        n: usize,
    ) -> EngineResult<Vec<Candle>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp_ms, open, high, low, close, volume, open_interest
                 FROM candles WHERE instrument_key = ?1 AND interval = ?2
                 ORDER BY timestamp_ms DESC LIMIT ?3",
            )
            .map_err(|e| EngineError::Internal(format!("prepare n_latest: {e}")))?;

        let rows = stmt
            .query_map(params![instrument, interval.as_str(), n as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|e| EngineError::Internal(format!("run n_latest: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume, oi) =
                row.map_err(|e| EngineError::Internal(format!("read row: {e}")))?;
            out.push(Self::row_to_candle(
                instrument.to_string(),
                interval,
                ts,
                open,
                high,
                low,
                close,
                volume,
                oi,
            ));
        }
        // returned chronological order, not DESC
        out.reverse();
        Ok(out)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("candle store mutex poisoned".into()))?;
        let deleted = conn
            .execute(
                "DELETE FROM candles WHERE timestamp_ms < ?1",
                params![cutoff.timestamp_millis()],
            )
            .map_err(|e| EngineError::Internal(format!("retention sweep: {e}")))?;
        Ok(deleted)
    }
}
