//! `tabular-etl-worker` runs the stages of a message-driven ETL pipeline: ingest, load, clean
//! and join. Each stage pulls jobs from a durable queue, transforms tabular datasets held in blob
//! storage and records the job's status in a document store.
//!
//! ## Data flow
//!
//! ```text
//! broker delivery -> job::Router -> stages::<stage>::run -> blob write
//!                                                         -> job::JobLifecycle (complete | error)
//!                                                         -> ack
//! ```
//!
//! - One delivery is in flight per worker. It is acknowledged only after the job's terminal
//!   status was written, so a crash leads to redelivery.
//! - Job status moves `queued -> complete | error` and never leaves a terminal state.
//! - Output objects get deterministic names, so a redelivered job overwrites its own output.
//!
//! ## What a dataset looks like in memory
//!
//! Every reader produces a [`types::DataSet`]: a [`types::Schema`] plus rows of typed
//! [`types::Value`]s. Column types are inferred while reading:
//!
//! - [`types::DataType::Int64`] when every non-null value is an integer
//! - [`types::DataType::Float64`] when every non-null value is numeric (also for all-null columns)
//! - [`types::DataType::Bool`] for `true`/`false` columns
//! - [`types::DataType::Utf8`] otherwise
//!
//! Supported input formats (by object extension): `.csv`/`.txt`, `.json`/`.ndjson`,
//! `.parquet`/`.pq`. Stage outputs are always CSV.
//!
//! ## Transformations without any I/O
//!
//! ```rust
//! use tabular_etl_worker::ingestion::{read_csv_from_bytes, CsvOptions};
//! use tabular_etl_worker::metadata::infer_features;
//! use tabular_etl_worker::processing::clean;
//!
//! let ds = read_csv_from_bytes(b"id,name\n1, Ada \n2,\n3,Bob\n", &CsvOptions::default()).unwrap();
//! let cleaned = clean(&ds, 0.5).unwrap();
//! assert_eq!(cleaned.row_count(), 2);
//!
//! let features = infer_features(&cleaned);
//! assert_eq!(features[0].name, "id");
//! assert_eq!(features[0].flags.map(|f| f.positive), Some(true));
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: readers for csv/json/parquet payloads and the CSV writer
//! - [`types`]: schema + in-memory dataset types
//! - [`metadata`]: dataset descriptors and per-column feature inference
//! - [`processing`]: cleaning and join engines
//! - [`job`]: message shapes, job status state machine and the router
//! - [`stages`]: the ingest/load/clean/join drivers
//! - [`store`]: blob, document and broker ports with their adapters
//! - [`config`], [`logging`]: runtime configuration for the worker binary
//! - [`error`]: error types used across ingestion

pub mod config;
pub mod error;
pub mod ingestion;
pub mod job;
pub mod logging;
pub mod metadata;
pub mod processing;
pub mod stages;
pub mod store;
pub mod types;

pub use error::{IngestionError, IngestionResult};
