//! Temperature log storage and tuning calculation.

pub mod temperature_log;
pub mod tuning;

pub use temperature_log::{Area, LogSession, RowSet, TemperatureRow};
pub use tuning::{ParamTable, TuningResult, ZONES};
