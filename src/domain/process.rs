/// Master data process state machine (C8, §3/§4.8).
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    DailyIngestion,
    FilterPipeline,
    MinuteIngestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    pub kind: StepKind,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ProcessStep {
    pub fn pending(kind: StepKind) -> Self {
        ProcessStep {
            kind,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// One per calendar date. Steps run strictly in order; a step is Running
/// only if every lower-numbered step is Completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDataProcess {
    pub id: String,
    pub process_date: NaiveDate,
    pub number_of_past_days: u32,
    pub status: ProcessStatus,
    pub steps: [ProcessStep; 3],
}

impl MasterDataProcess {
    pub fn new(id: String, process_date: NaiveDate, number_of_past_days: u32) -> Self {
        MasterDataProcess {
            id,
            process_date,
            number_of_past_days,
            status: ProcessStatus::Running,
            steps: [
                ProcessStep::pending(StepKind::DailyIngestion),
                ProcessStep::pending(StepKind::FilterPipeline),
                ProcessStep::pending(StepKind::MinuteIngestion),
            ],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProcessStatus::Completed | ProcessStatus::Failed)
    }

    pub fn step(&self, idx: usize) -> &ProcessStep {
        &self.steps[idx]
    }

    pub fn step_mut(&mut self, idx: usize) -> &mut ProcessStep {
        &mut self.steps[idx]
    }
}
