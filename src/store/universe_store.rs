/// Universe store: the read-mostly set of tradable instruments (§3, §6).
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::domain::InstrumentMeta;
use crate::error::{EngineError, EngineResult};

pub trait UniverseStore: Send + Sync {
    fn list_all(&self) -> EngineResult<Vec<InstrumentMeta>>;
    fn get_by_symbol(&self, symbol: &str) -> EngineResult<Option<InstrumentMeta>>;
    fn upsert(&self, instrument: &InstrumentMeta) -> EngineResult<()>;
    fn toggle_selection(&self, symbol: &str, selected: bool) -> EngineResult<()>;
}

pub struct SqliteUniverseStore {
    conn: Mutex<Connection>,
}

impl SqliteUniverseStore {
    pub fn new(db_file: &str) -> EngineResult<Self> {
        let conn = Connection::open(db_file)
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteUniverseStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteUniverseStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS universe (
                instrument_key TEXT PRIMARY KEY,
                symbol TEXT NOT NULL UNIQUE,
                exchange TEXT NOT NULL,
                tick_size REAL NOT NULL,
                lot_size INTEGER NOT NULL,
                selected INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )
        .map_err(|e| EngineError::Internal(format!("init schema: {e}")))?;
        Ok(())
    }
}

impl UniverseStore for SqliteUniverseStore {
    fn list_all(&self) -> EngineResult<Vec<InstrumentMeta>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("universe store mutex poisoned".into()))?;
        let mut stmt = conn
            .prepare("SELECT instrument_key, symbol, exchange, tick_size, lot_size FROM universe WHERE selected = 1")
            .map_err(|e| EngineError::Internal(format!("prepare list_all: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(InstrumentMeta {
                    instrument_key: row.get(0)?,
                    symbol: row.get(1)?,
                    exchange: row.get(2)?,
                    tick_size: row.get(3)?,
                    lot_size: row.get::<_, i64>(4)? as u32,
                })
            })
            .map_err(|e| EngineError::Internal(format!("run list_all: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| EngineError::Internal(format!("read row: {e}")))?);
        }
        Ok(out)
    }

    fn get_by_symbol(&self, symbol: &str) -> EngineResult<Option<InstrumentMeta>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("universe store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT instrument_key, symbol, exchange, tick_size, lot_size FROM universe WHERE symbol = ?1",
            params![symbol],
            |row| {
                Ok(InstrumentMeta {
                    instrument_key: row.get(0)?,
                    symbol: row.get(1)?,
                    exchange: row.get(2)?,
                    tick_size: row.get(3)?,
                    lot_size: row.get::<_, i64>(4)? as u32,
                })
            },
        )
        .optional()
        .map_err(|e| EngineError::Internal(format!("get_by_symbol: {e}")))
    }

    fn upsert(&self, instrument: &InstrumentMeta) -> EngineResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("universe store mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO universe (instrument_key, symbol, exchange, tick_size, lot_size, selected)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(instrument_key) DO UPDATE SET
                symbol = excluded.symbol,
                exchange = excluded.exchange,
                tick_size = excluded.tick_size,
                lot_size = excluded.lot_size",
            params![
                instrument.instrument_key,
                instrument.symbol,
                instrument.exchange,
                instrument.tick_size,
                instrument.lot_size as i64,
            ],
        )
        .map_err(|e| EngineError::Internal(format!("upsert instrument: {e}")))?;
        Ok(())
    }

    fn toggle_selection(&self, symbol: &str, selected: bool) -> EngineResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("universe store mutex poisoned".into()))?;
        conn.execute(
            "UPDATE universe SET selected = ?2 WHERE symbol = ?1",
            params![symbol, selected as i64],
        )
        .map_err(|e| EngineError::Internal(format!("toggle_selection: {e}")))?;
        Ok(())
    }
}
