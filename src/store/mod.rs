/// Persistence contracts and SQLite implementations (C1, §4.1, §6).
pub mod candle_store;
pub mod process_store;
pub mod universe_store;

pub use candle_store::{CandleStore, DateRange, SqliteCandleStore, UpsertSummary};
pub use process_store::{ProcessStore, SqliteProcessStore};
pub use universe_store::{SqliteUniverseStore, UniverseStore};
