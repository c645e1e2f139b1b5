//! In-memory dataset transformations used by the stage drivers.
//!
//! - [`clean`]: null pruning bounded by a shrink ratio, plus string/number normalization
//! - [`join`]: relational joins by a shared column
//!
//! ## Example: clean then join
//!
//! ```rust
//! use tabular_etl_worker::processing::{clean, join_all, JoinMode, MissingColumnPolicy};
//! use tabular_etl_worker::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let people = DataSet::new(
//!     Schema::new(vec![
//!         Field::new("id", DataType::Int64),
//!         Field::new("name", DataType::Utf8),
//!     ]),
//!     vec![
//!         vec![Value::Int64(1), Value::Utf8("  Ada ".into())],
//!         vec![Value::Int64(2), Value::Null],
//!     ],
//! );
//! let scores = DataSet::new(
//!     Schema::new(vec![
//!         Field::new("id", DataType::Int64),
//!         Field::new("score", DataType::Float64),
//!     ]),
//!     vec![vec![Value::Int64(1), Value::Float64(9.5)]],
//! );
//!
//! // Up to half of the rows may be dropped.
//! let cleaned = clean(&people, 0.5).unwrap();
//! assert_eq!(cleaned.row_count(), 1);
//!
//! let joined = join_all(&[cleaned, scores], "id", JoinMode::Inner, MissingColumnPolicy::Fail).unwrap();
//! assert_eq!(
//!     joined.rows,
//!     vec![vec![Value::Int64(1), Value::Utf8("ada".into()), Value::Float64(9.5)]]
//! );
//! ```

pub mod clean;
pub mod join;

pub use clean::{clean, clean_number, clean_string, drop_null, CleanError};
pub use join::{join_all, join_pair, JoinError, JoinMode, MissingColumnPolicy};
