//! Unified read entrypoint.
//!
//! Stage drivers receive raw object bytes from blob storage and call [`read_from_bytes`], which
//! picks a reader from the object's extension (or an explicit [`ReadOptions::format`]) and
//! reports the outcome to an optional [`IngestionObserver`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::error::{IngestionError, IngestionResult};
use crate::types::DataSet;

use super::csv::{read_csv_from_bytes, CsvOptions};
use super::json::read_json_from_str;
use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use super::parquet::read_parquet_from_bytes;

/// Supported payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionFormat {
    /// Delimited text.
    Csv,
    /// JSON array-of-objects or NDJSON.
    Json,
    /// Apache Parquet.
    Parquet,
}

impl IngestionFormat {
    /// Parse a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "json" | "ndjson" => Some(Self::Json),
            "parquet" | "pq" => Some(Self::Parquet),
            _ => None,
        }
    }

    /// Format for an object key such as `raw/2024/data.csv`.
    pub fn from_key(key: &str) -> IngestionResult<Self> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let extension = match file_name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        };
        Self::from_extension(extension).ok_or_else(|| IngestionError::UnsupportedFormat {
            extension: extension.to_string(),
        })
    }
}

/// Options controlling [`read_from_bytes`].
#[derive(Clone)]
pub struct ReadOptions {
    /// If `None`, the format is inferred from the source key's extension.
    pub format: Option<IngestionFormat>,
    /// CSV-specific options.
    pub csv: CsvOptions,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("format", &self.format)
            .field("csv", &self.csv)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: None,
            csv: CsvOptions::default(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// Read an object payload into a [`DataSet`].
///
/// When an observer is configured, this function reports:
///
/// - `on_success` on success, with row/column counts
/// - `on_failure` on failure, with a computed severity
/// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
pub fn read_from_bytes(
    source: &str,
    payload: Vec<u8>,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let format = match options.format {
        Some(f) => f,
        None => IngestionFormat::from_key(source)?,
    };

    let result = match format {
        IngestionFormat::Csv => read_csv_from_bytes(&payload, &options.csv),
        IngestionFormat::Json => String::from_utf8(payload)
            .map_err(IngestionError::from)
            .and_then(|text| read_json_from_str(&text)),
        IngestionFormat::Parquet => read_parquet_from_bytes(payload),
    };

    if let Some(obs) = options.observer.as_ref() {
        let ctx = IngestionContext {
            source: source.to_string(),
            format,
        };
        match &result {
            Ok(ds) => obs.on_success(
                &ctx,
                IngestionStats {
                    rows: ds.row_count(),
                    columns: ds.column_count(),
                },
            ),
            Err(e) => {
                let sev = severity_for_error(e);
                obs.on_failure(&ctx, sev, e);
                if sev >= options.alert_at_or_above {
                    obs.on_alert(&ctx, sev, e);
                }
            }
        }
    }

    result
}

fn severity_for_error(e: &IngestionError) -> IngestionSeverity {
    match e {
        IngestionError::Io(_) => IngestionSeverity::Critical,
        IngestionError::Parquet(err) => {
            if error_chain_contains_io(err) {
                IngestionSeverity::Critical
            } else {
                IngestionSeverity::Error
            }
        }
        IngestionError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => IngestionSeverity::Critical,
            _ => IngestionSeverity::Error,
        },
        IngestionError::UnsupportedFormat { .. } => IngestionSeverity::Warning,
        IngestionError::Json(_)
        | IngestionError::Encoding(_)
        | IngestionError::SchemaMismatch { .. } => IngestionSeverity::Error,
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}
