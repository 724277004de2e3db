/// Universe and stock-group types (§3).
use serde::{Deserialize, Serialize};

use crate::domain::candle::InstrumentKey;

/// Read-mostly metadata for one tradable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub instrument_key: InstrumentKey,
    pub symbol: String,
    pub exchange: String,
    pub tick_size: f64,
    pub lot_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Breakout,
    Pullback,
    MeanReversion,
    Momentum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A named, ordered set of instrument keys tagged with an entry type.
///
/// Invariant enforced by the owning store: at most one group per
/// (instrument_key, entry_type); at most one group may be Executing at a
/// time (single-executor invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockGroup {
    pub name: String,
    pub entry_type: EntryType,
    pub instrument_keys: Vec<InstrumentKey>,
    pub status: GroupStatus,
}
