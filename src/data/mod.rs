//! Data storage modules.
pub mod sweep_csv;

pub use sweep_csv::SweepCsvWriter;
