use thiserror::Error;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned when reading or writing tabular payloads.
///
/// Shared across CSV/JSON/Parquet so that stage drivers deal with one failure type per payload.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet decoding error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload bytes are not valid UTF-8.
    #[error("payload is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// The payload does not have a usable tabular shape (no header, ragged rows, etc.).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// The object extension does not map to a supported format.
    #[error("unsupported format '{extension}'")]
    UnsupportedFormat { extension: String },
}
