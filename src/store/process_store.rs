/// Process-history store (§4.8, §6).
///
/// Grounded on the teacher's `timeframe_status.rs`: a small status table
/// keyed by identity, read-modify-write under the connection's own
/// transaction, no cross-row locking needed.
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::domain::process::{MasterDataProcess, ProcessStatus, StepStatus};
use crate::error::{EngineError, EngineResult};

pub trait ProcessStore: Send + Sync {
    /// Returns the existing non-terminal process for `date` if one exists,
    /// otherwise creates and persists a new one. Idempotent (§4.8).
    fn start_or_get(
        &self,
        date: NaiveDate,
        number_of_past_days: u32,
    ) -> EngineResult<MasterDataProcess>;

    fn get(&self, id: &str) -> EngineResult<Option<MasterDataProcess>>;

    fn save(&self, process: &MasterDataProcess) -> EngineResult<()>;

    fn history(&self, limit: usize) -> EngineResult<Vec<MasterDataProcess>>;
}

pub struct SqliteProcessStore {
    conn: Mutex<Connection>,
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
    }
}

fn step_status_from_str(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        _ => StepStatus::Pending,
    }
}

fn process_status_str(s: ProcessStatus) -> &'static str {
    match s {
        ProcessStatus::Running => "running",
        ProcessStatus::Completed => "completed",
        ProcessStatus::Failed => "failed",
    }
}

fn process_status_from_str(s: &str) -> ProcessStatus {
    match s {
        "completed" => ProcessStatus::Completed,
        "failed" => ProcessStatus::Failed,
        _ => ProcessStatus::Running,
    }
}

impl SqliteProcessStore {
    pub fn new(db_file: &str) -> EngineResult<Self> {
        let conn = Connection::open(db_file)
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteProcessStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("open sqlite: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(SqliteProcessStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS master_data_processes (
                id TEXT PRIMARY KEY,
                process_date TEXT NOT NULL UNIQUE,
                number_of_past_days INTEGER NOT NULL,
                status TEXT NOT NULL,
                step1_status TEXT NOT NULL,
                step1_started_ms INTEGER,
                step1_completed_ms INTEGER,
                step1_error TEXT,
                step2_status TEXT NOT NULL,
                step2_started_ms INTEGER,
                step2_completed_ms INTEGER,
                step2_error TEXT,
                step3_status TEXT NOT NULL,
                step3_started_ms INTEGER,
                step3_completed_ms INTEGER,
                step3_error TEXT,
                created_at_ms INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| EngineError::Internal(format!("init schema: {e}")))?;
        Ok(())
    }

    fn row_to_process(row: &rusqlite::Row) -> rusqlite::Result<MasterDataProcess> {
        let id: String = row.get(0)?;
        let date_str: String = row.get(1)?;
        let process_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        let number_of_past_days: i64 = row.get(2)?;
        let status_str: String = row.get(3)?;

        let mut process =
            MasterDataProcess::new(id, process_date, number_of_past_days as u32);
        process.status = process_status_from_str(&status_str);

        for (idx, base) in [(0usize, 4usize), (1, 8), (2, 12)] {
            let status: String = row.get(base)?;
            let started: Option<i64> = row.get(base + 1)?;
            let completed: Option<i64> = row.get(base + 2)?;
            let error: Option<String> = row.get(base + 3)?;
            let step = process.step_mut(idx);
            step.status = step_status_from_str(&status);
            step.started_at = started.and_then(chrono::DateTime::from_timestamp_millis);
            step.completed_at = completed.and_then(chrono::DateTime::from_timestamp_millis);
            step.error_message = error;
        }

        Ok(process)
    }
}

impl ProcessStore for SqliteProcessStore {
    fn start_or_get(
        &self,
        date: NaiveDate,
        number_of_past_days: u32,
    ) -> EngineResult<MasterDataProcess> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("process store mutex poisoned".into()))?;

        let existing = conn
            .query_row(
                "SELECT id, process_date, number_of_past_days, status,
                        step1_status, step1_started_ms, step1_completed_ms, step1_error,
                        step2_status, step2_started_ms, step2_completed_ms, step2_error,
                        step3_status, step3_started_ms, step3_completed_ms, step3_error
                 FROM master_data_processes WHERE process_date = ?1",
                params![date.format("%Y-%m-%d").to_string()],
                Self::row_to_process,
            )
            .optional()
            .map_err(|e| EngineError::Internal(format!("lookup process: {e}")))?;

        if let Some(process) = existing {
            return Ok(process);
        }

        let process = MasterDataProcess::new(
            uuid::Uuid::new_v4().to_string(),
            date,
            number_of_past_days,
        );

        conn.execute(
            "INSERT INTO master_data_processes (
                id, process_date, number_of_past_days, status,
                step1_status, step1_started_ms, step1_completed_ms, step1_error,
                step2_status, step2_started_ms, step2_completed_ms, step2_error,
                step3_status, step3_started_ms, step3_completed_ms, step3_error,
                created_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, ?5, NULL, NULL, NULL, ?5, NULL, NULL, NULL, ?6)",
            params![
                process.id,
                date.format("%Y-%m-%d").to_string(),
                process.number_of_past_days as i64,
                process_status_str(process.status),
                step_status_str(StepStatus::Pending),
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| EngineError::Internal(format!("insert process: {e}")))?;

        Ok(process)
    }

    fn get(&self, id: &str) -> EngineResult<Option<MasterDataProcess>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("process store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT id, process_date, number_of_past_days, status,
                    step1_status, step1_started_ms, step1_completed_ms, step1_error,
                    step2_status, step2_started_ms, step2_completed_ms, step2_error,
                    step3_status, step3_started_ms, step3_completed_ms, step3_error
             FROM master_data_processes WHERE id = ?1",
            params![id],
            Self::row_to_process,
        )
        .optional()
        .map_err(|e| EngineError::Internal(format!("get process: {e}")))
    }

    fn save(&self, process: &MasterDataProcess) -> EngineResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("process store mutex poisoned".into()))?;

        conn.execute(
            "UPDATE master_data_processes SET
                status = ?2,
                step1_status = ?3, step1_started_ms = ?4, step1_completed_ms = ?5, step1_error = ?6,
                step2_status = ?7, step2_started_ms = ?8, step2_completed_ms = ?9, step2_error = ?10,
                step3_status = ?11, step3_started_ms = ?12, step3_completed_ms = ?13, step3_error = ?14
             WHERE id = ?1",
            params![
                process.id,
                process_status_str(process.status),
                step_status_str(process.step(0).status),
                process.step(0).started_at.map(|t| t.timestamp_millis()),
                process.step(0).completed_at.map(|t| t.timestamp_millis()),
                process.step(0).error_message,
                step_status_str(process.step(1).status),
                process.step(1).started_at.map(|t| t.timestamp_millis()),
                process.step(1).completed_at.map(|t| t.timestamp_millis()),
                process.step(1).error_message,
                step_status_str(process.step(2).status),
                process.step(2).started_at.map(|t| t.timestamp_millis()),
                process.step(2).completed_at.map(|t| t.timestamp_millis()),
                process.step(2).error_message,
            ],
        )
        .map_err(|e| EngineError::Internal(format!("save process: {e}")))?;
        Ok(())
    }

    fn history(&self, limit: usize) -> EngineResult<Vec<MasterDataProcess>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("process store mutex poisoned".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, process_date, number_of_past_days, status,
                        step1_status, step1_started_ms, step1_completed_ms, step1_error,
                        step2_status, step2_started_ms, step2_completed_ms, step2_error,
                        step3_status, step3_started_ms, step3_completed_ms, step3_error
                 FROM master_data_processes ORDER BY created_at_ms DESC LIMIT ?1",
            )
            .map_err(|e| EngineError::Internal(format!("prepare history: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_process)
            .map_err(|e| EngineError::Internal(format!("run history: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| EngineError::Internal(format!("read row: {e}")))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn start_or_get_is_idempotent() {
        let store = SqliteProcessStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();

        let a = store.start_or_get(date, 1).unwrap();
        let b = store.start_or_get(date, 1).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn step_failure_is_preserved_across_reload() {
        let store = SqliteProcessStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();
        let mut process = store.start_or_get(date, 1).unwrap();

        process.step_mut(0).status = StepStatus::Completed;
        process.step_mut(1).status = StepStatus::Failed;
        process.step_mut(1).error_message = Some("filter pipeline blew up".into());
        process.status = ProcessStatus::Failed;
        store.save(&process).unwrap();

        let reloaded = store.get(&process.id).unwrap().unwrap();
        assert_eq!(reloaded.status, ProcessStatus::Failed);
        assert_eq!(reloaded.step(1).status, StepStatus::Failed);
        assert_eq!(
            reloaded.step(1).error_message.as_deref(),
            Some("filter pipeline blew up")
        );
        assert_eq!(reloaded.step(2).status, StepStatus::Pending);
    }
}
