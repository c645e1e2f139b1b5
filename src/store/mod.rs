//! Ports to the three external collaborators: blob storage, the job document store and the
//! message broker.
//!
//! Stage drivers and the router only see the traits defined here. Adapters:
//!
//! - [`memory`]: in-process implementations of all three ports
//! - [`s3`]: S3/MinIO-compatible blob storage
//! - [`fs`]: file-backed document store and spool-directory broker

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobRecord;

pub mod fs;
pub mod memory;
pub mod s3;

pub use fs::{FsDocumentStore, SpoolBroker};
pub use memory::{MemoryBlobStore, MemoryBroker, MemoryDocumentStore};
pub use s3::S3BlobStore;

/// Content type of every stage output object.
pub const CSV_CONTENT_TYPE: &str = "application/csv";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("blob store request failed: {0}")]
    Blob(String),

    #[error("document store request failed: {0}")]
    Document(String),

    #[error("broker request failed: {0}")]
    Broker(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// The request can never succeed as given; retrying it is pointless.
    #[error("invalid {kind} name: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether repeating the same request cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::InvalidName { .. } | StoreError::Json(_))
    }
}

/// Object storage addressed by bucket and key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Create or overwrite an object.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StoreResult<()>;

    /// Every key in `bucket` starting with `prefix`, at any depth, in lexical order.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Job status records, one per job id per collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, job_id: &str) -> StoreResult<Option<JobRecord>>;

    /// Insert or replace the record keyed by `record.job_id`.
    async fn upsert(&self, collection: &str, record: &JobRecord) -> StoreResult<()>;
}

/// A message handed to a consumer and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every requeue.
    pub attempt: u32,
}

/// Durable queues with explicit settlement.
///
/// A broker grants at most `prefetch` unsettled deliveries; [`Broker::next_delivery`] returns
/// `None` while that limit is reached or every queue is empty. Unsettled deliveries are
/// redelivered after a restart.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, body: Vec<u8>) -> StoreResult<()>;

    /// Next message from the first non-empty queue in `queues`.
    async fn next_delivery(&self, queues: &[&str]) -> StoreResult<Option<Delivery>>;

    async fn ack(&self, tag: u64) -> StoreResult<()>;

    /// Return the message to the head of its queue with `attempt + 1`.
    async fn requeue(&self, tag: u64) -> StoreResult<()>;

    /// Park the message where it will not be redelivered.
    async fn dead_letter(&self, tag: u64, reason: &str) -> StoreResult<()>;
}
