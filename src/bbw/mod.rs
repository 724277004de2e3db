/// BBW monitor (C6, §4.6): rolling squeeze detection and alerting.
pub mod alerts;
pub mod monitor;

pub use alerts::{Alert, AlertBus, AlertRing, AlertType};
pub use monitor::{BbwDashboardEntry, BbwMonitor, BbwTrend};
