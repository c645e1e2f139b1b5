//! Stage drivers: the end-to-end procedure behind each queue.
//!
//! Every driver reads its inputs from blob storage, transforms them in memory and writes its
//! output objects before returning the result payload. Status bookkeeping is left to the
//! router; a driver error means no output was written for that step.
//!
//! Output objects are named `<output-path>/<id>.csv` where `id` is derived from the stage, the
//! job id and the output index, so a redelivered job overwrites its own earlier output.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::IngestionError;
use crate::ingestion::{read_from_bytes, write_csv, IngestionFormat, IngestionObserver, ReadOptions};
use crate::job::{BlobRef, JobMessage, MessageError, Stage};
use crate::processing::{CleanError, JoinError};
use crate::store::{BlobStore, StoreError, CSV_CONTENT_TYPE};
use crate::types::DataSet;

pub mod clean;
pub mod fetch;
pub mod ingest;
pub mod join;
pub mod load;

pub use fetch::{FetchError, HttpFetcher, SourceFetcher, StaticFetcher};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to read {source_ref}: {error}")]
    Read {
        source_ref: String,
        #[source]
        error: IngestionError,
    },

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Clean(#[from] CleanError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("no non-empty datasets found in {0}")]
    NoData(String),

    #[error("stage handler panicked: {0}")]
    Panicked(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Shared collaborators of the stage drivers. Cheap to clone.
#[derive(Clone)]
pub struct StageContext {
    pub blobs: Arc<dyn BlobStore>,
    pub fetcher: Arc<dyn SourceFetcher>,
    /// Used by the clean stage when a message carries no `max-shrink`.
    pub default_max_shrink: f64,
    pub observer: Option<Arc<dyn IngestionObserver>>,
}

impl StageContext {
    pub fn new(blobs: Arc<dyn BlobStore>, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            blobs,
            fetcher,
            default_max_shrink: 0.0,
            observer: None,
        }
    }

    pub fn with_default_max_shrink(mut self, max_shrink: f64) -> Self {
        self.default_max_shrink = max_shrink;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions {
            observer: self.observer.clone(),
            ..ReadOptions::default()
        }
    }

    /// Read one object; `None` when its format is unsupported or it holds no rows.
    pub(crate) async fn read_object(&self, bucket: &str, key: &str) -> StageResult<Option<DataSet>> {
        let source_ref = format!("{bucket}/{key}");
        if let Err(e) = IngestionFormat::from_key(key) {
            warn!(object = %source_ref, error = %e, "skipping object");
            return Ok(None);
        }

        let payload = self.blobs.get(bucket, key).await?;
        let dataset = read_from_bytes(&source_ref, payload, &self.read_options())
            .map_err(|error| StageError::Read { source_ref: source_ref.clone(), error })?;

        if dataset.is_empty() {
            debug!(object = %source_ref, "skipping empty dataset");
            return Ok(None);
        }
        Ok(Some(dataset))
    }

    /// Read every readable, non-empty object directly inside `dir`, in key order.
    pub(crate) async fn read_directory(&self, dir: &BlobRef) -> StageResult<Vec<(String, DataSet)>> {
        let prefix = dir.dir_prefix();
        let keys = self.blobs.list(&dir.bucket, &prefix).await?;

        let mut datasets = Vec::new();
        for key in keys {
            let name = &key[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            if let Some(dataset) = self.read_object(&dir.bucket, &key).await? {
                datasets.push((format!("{}/{}", dir.bucket, key), dataset));
            }
        }
        Ok(datasets)
    }

    /// Read a single object when `input` names a file of a known format, otherwise every
    /// object inside the `input` directory, concatenated.
    pub(crate) async fn read_input(&self, input: &BlobRef) -> StageResult<Option<DataSet>> {
        if IngestionFormat::from_key(input.file_name()).is_ok() {
            return self.read_object(&input.bucket, &input.path).await;
        }
        let parts: Vec<DataSet> = self
            .read_directory(input)
            .await?
            .into_iter()
            .map(|(_, ds)| ds)
            .collect();
        Ok((!parts.is_empty()).then(|| DataSet::concat(&parts)))
    }

    /// Write `dataset` as CSV to `key` under `output`'s bucket; returns `bucket/key`.
    pub(crate) async fn write_dataset(
        &self,
        output: &BlobRef,
        key: &str,
        dataset: &DataSet,
    ) -> StageResult<String> {
        let body = write_csv(dataset)?;
        self.blobs.put(&output.bucket, key, body, CSV_CONTENT_TYPE).await?;
        Ok(format!("{}/{}", output.bucket, key))
    }
}

/// Deterministic key for output number `index` of a job.
pub fn output_key(stage: Stage, job_id: &str, index: usize, output: &BlobRef) -> String {
    let name = format!("{stage}/{job_id}/{index}");
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    output.child(&format!("{}.csv", id.simple()))
}

/// Run the driver for `message` and return its result payload.
pub async fn run(ctx: &StageContext, message: &JobMessage) -> StageResult<serde_json::Value> {
    match message {
        JobMessage::Ingest(m) => ingest::run(ctx, m).await,
        JobMessage::Load(m) => load::run(ctx, m).await,
        JobMessage::Clean(m) => clean::run(ctx, m).await,
        JobMessage::Join(m) => join::run(ctx, m).await,
    }
}

/// Consumer of finished datasets for report rendering.
///
/// The router does not drive this stage; it is the attachment point for a rendering worker.
#[async_trait]
pub trait VisualizationSink: Send + Sync {
    async fn render(
        &self,
        dataset: &BlobRef,
        analytics: Option<&serde_json::Value>,
        output: &BlobRef,
    ) -> StageResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_keys_are_stable_per_job_and_index() {
        let out = BlobRef::new("bkt", "cleaned");
        let a = output_key(Stage::Clean, "job-1", 0, &out);
        assert_eq!(a, output_key(Stage::Clean, "job-1", 0, &out));
        assert_ne!(a, output_key(Stage::Clean, "job-1", 1, &out));
        assert_ne!(a, output_key(Stage::Load, "job-1", 0, &out));
        assert!(a.starts_with("cleaned/") && a.ends_with(".csv"));
    }
}
