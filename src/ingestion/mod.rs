//! Readers and writers for tabular payloads.
//!
//! Most callers should use [`read_from_bytes`] (from [`unified`]) which:
//!
//! - picks a reader from the object key's extension (or an explicit [`ReadOptions::format`])
//! - infers column types while reading into an in-memory [`crate::types::DataSet`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]
//!
//! Stage outputs are always written with [`csv::write_csv`].

pub mod csv;
pub mod json;
pub mod observability;
pub mod parquet;
pub mod unified;

pub use csv::{read_csv_from_bytes, write_csv, CsvOptions};
pub use observability::{
    IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, TracingObserver,
};
pub use unified::{read_from_bytes, IngestionFormat, ReadOptions};
