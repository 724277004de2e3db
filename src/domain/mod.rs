/// Modèle de données partagé par tous les composants (§3).
pub mod candle;
pub mod instrument;
pub mod process;

pub use candle::{Candle, Candle5MinProjection, InstrumentKey, Interval, Price};
pub use instrument::{EntryType, GroupStatus, InstrumentMeta, StockGroup};
pub use process::{MasterDataProcess, ProcessStatus, ProcessStep, StepKind, StepStatus};
