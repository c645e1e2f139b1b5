use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use tabular_etl_worker::job::{JobLifecycle, JobRecord, JobStatus, Outcome, Router, Stage};
use tabular_etl_worker::stages::{FetchError, SourceFetcher, StageContext, StaticFetcher};
use tabular_etl_worker::store::{
    BlobStore, Broker, DocumentStore, MemoryBlobStore, MemoryBroker, MemoryDocumentStore, StoreError,
    StoreResult,
};

const SOURCE_URL: &str = "http://data.test/people.csv";

/// Fails the first write of a `complete` record, then behaves normally.
#[derive(Default)]
struct FlakyDocuments {
    inner: MemoryDocumentStore,
    tripped: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyDocuments {
    async fn find_one(&self, collection: &str, job_id: &str) -> StoreResult<Option<JobRecord>> {
        self.inner.find_one(collection, job_id).await
    }

    async fn upsert(&self, collection: &str, record: &JobRecord) -> StoreResult<()> {
        if record.status == JobStatus::Complete && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Document("connection reset".into()));
        }
        self.inner.upsert(collection, record).await
    }
}

/// Rejects every job id as unstorable.
struct RejectingDocuments;

#[async_trait]
impl DocumentStore for RejectingDocuments {
    async fn find_one(&self, _collection: &str, job_id: &str) -> StoreResult<Option<JobRecord>> {
        Err(StoreError::InvalidName {
            kind: "job id",
            name: job_id.to_string(),
        })
    }

    async fn upsert(&self, _collection: &str, record: &JobRecord) -> StoreResult<()> {
        Err(StoreError::InvalidName {
            kind: "job id",
            name: record.job_id.clone(),
        })
    }
}

struct PanickingFetcher;

#[async_trait]
impl SourceFetcher for PanickingFetcher {
    async fn fetch(&self, _url: &str, _token: Option<&str>) -> Result<Vec<u8>, FetchError> {
        panic!("decoder blew up");
    }
}

fn source_fetcher() -> Arc<StaticFetcher> {
    Arc::new(StaticFetcher::new().with_source(SOURCE_URL, "id,name\n1,Ada\n2,Grace\n"))
}

fn router_with(
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<MemoryBlobStore>,
    fetcher: Arc<dyn SourceFetcher>,
) -> (JobLifecycle, Router) {
    let lifecycle = JobLifecycle::new(documents);
    let router = Router::new(lifecycle.clone(), StageContext::new(blobs, fetcher), 3);
    (lifecycle, router)
}

fn ingest_body(job_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "job-id": job_id,
        "minio-output": "lake/raw",
        "ingestion_json": { "url": SOURCE_URL }
    }))
    .unwrap()
}

#[tokio::test]
async fn unroutable_deliveries_are_dead_lettered() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let (_, router) = router_with(documents.clone(), Arc::new(MemoryBlobStore::new()), source_fetcher());
    let broker = MemoryBroker::default();

    broker.publish("reports", b"{\"job-id\": \"r-1\"}".to_vec()).await.unwrap();
    let delivery = broker.next_delivery(&["reports"]).await.unwrap().unwrap();
    assert_eq!(router.handle(&broker, delivery).await.unwrap(), Outcome::DeadLettered);

    broker.publish("data-loading", b"not json".to_vec()).await.unwrap();
    broker.publish("join", b"{\"column\": \"id\"}".to_vec()).await.unwrap();
    let outcomes = router.run_until_idle(&broker).await.unwrap();
    assert_eq!(outcomes, vec![Outcome::DeadLettered, Outcome::DeadLettered]);

    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 3);
    assert!(dead[0].reason.contains("reports"));
    assert!(dead[2].reason.contains("job-id"));
    assert_eq!(broker.in_flight(), 0);
    assert!(documents.is_empty(Stage::Load.collection()));
}

#[tokio::test]
async fn unregistered_job_is_retried_then_dead_lettered() {
    let (_, router) = router_with(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
        source_fetcher(),
    );
    let broker = MemoryBroker::default();
    broker
        .publish(
            "data-cleaning",
            serde_json::to_vec(&json!({
                "job-id": "ghost",
                "minio-input": "lake/raw",
                "minio-output": "lake/clean"
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let outcomes = router.run_until_idle(&broker).await.unwrap();

    assert_eq!(
        outcomes,
        vec![Outcome::Requeued, Outcome::Requeued, Outcome::DeadLettered]
    );
    let dead = broker.dead_letters();
    assert_eq!(dead[0].attempt, 3);
    assert!(dead[0].reason.starts_with("gave up after 3 attempts"));
}

#[tokio::test]
async fn settled_job_is_acknowledged_without_running() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let fetcher = source_fetcher();
    let (lifecycle, router) = router_with(Arc::new(MemoryDocumentStore::new()), blobs.clone(), fetcher.clone());
    lifecycle.register(Stage::Ingest, "done-1").await.unwrap();
    lifecycle.complete(Stage::Ingest, "done-1", json!({"job-id": "done-1"})).await.unwrap();

    let broker = MemoryBroker::default();
    broker.publish("data-ingesting", ingest_body("done-1")).await.unwrap();

    assert_eq!(router.run_until_idle(&broker).await.unwrap(), vec![Outcome::Skipped]);
    assert!(fetcher.seen_tokens().is_empty());
    assert!(blobs.keys("lake").is_empty());
    let record = lifecycle.lookup(Stage::Ingest, "done-1").await.unwrap();
    assert_eq!(record.result, Some(json!({"job-id": "done-1"})));
}

#[tokio::test]
async fn stage_failure_marks_job_as_error_and_writes_nothing() {
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs.put("lake", "raw/a.csv", b"id\n1\n".to_vec(), "text/csv").await.unwrap();
    let (lifecycle, router) = router_with(Arc::new(MemoryDocumentStore::new()), blobs.clone(), source_fetcher());
    lifecycle.register(Stage::Clean, "c-1").await.unwrap();

    let broker = MemoryBroker::default();
    broker
        .publish(
            "data-cleaning",
            serde_json::to_vec(&json!({
                "job-id": "c-1",
                "minio-input": "lake/raw",
                "minio-output": "lake/clean",
                "max-shrink": 1.5
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(router.run_until_idle(&broker).await.unwrap(), vec![Outcome::Failed]);

    let record = lifecycle.lookup(Stage::Clean, "c-1").await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.message.unwrap().contains("max shrink"));
    assert!(record.result.is_none());
    assert_eq!(blobs.keys("lake"), vec!["raw/a.csv"]);
    assert!(broker.dead_letters().is_empty());
}

#[tokio::test]
async fn malformed_stage_payload_fails_the_job() {
    let (lifecycle, router) = router_with(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
        source_fetcher(),
    );
    lifecycle.register(Stage::Join, "j-1").await.unwrap();

    let broker = MemoryBroker::default();
    broker
        .publish(
            "join",
            serde_json::to_vec(&json!({ "job-id": "j-1", "column": "id", "type": "sideways" })).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(router.run_until_idle(&broker).await.unwrap(), vec![Outcome::Failed]);
    let record = lifecycle.lookup(Stage::Join, "j-1").await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.message.unwrap().contains("invalid join payload"));
}

#[tokio::test]
async fn lost_status_write_is_redelivered_and_reuses_the_output_key() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let documents = Arc::new(FlakyDocuments::default());
    let (lifecycle, router) = router_with(documents, blobs.clone(), source_fetcher());

    let broker = MemoryBroker::default();
    broker.publish("data-ingesting", ingest_body("in-1")).await.unwrap();

    let outcomes = router.run_until_idle(&broker).await.unwrap();

    assert_eq!(outcomes, vec![Outcome::Requeued, Outcome::Completed]);
    assert_eq!(blobs.keys("lake").len(), 1);
    let record = lifecycle.lookup(Stage::Ingest, "in-1").await.unwrap();
    assert_eq!(record.status, JobStatus::Complete);
    let location = record.result.unwrap()["ingested"].as_str().unwrap().to_string();
    assert_eq!(location, format!("lake/{}", blobs.keys("lake")[0]));
}

#[tokio::test]
async fn panicking_stage_is_recorded_as_a_failure() {
    let (lifecycle, router) = router_with(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(PanickingFetcher),
    );
    let broker = MemoryBroker::default();
    broker.publish("data-ingesting", ingest_body("in-2")).await.unwrap();

    assert_eq!(router.run_until_idle(&broker).await.unwrap(), vec![Outcome::Failed]);

    let record = lifecycle.lookup(Stage::Ingest, "in-2").await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.message.unwrap().contains("decoder blew up"));
    assert_eq!(broker.in_flight(), 0);
}

#[tokio::test]
async fn permanent_store_error_is_dead_lettered_without_retries() {
    let (_, router) = router_with(
        Arc::new(RejectingDocuments),
        Arc::new(MemoryBlobStore::new()),
        source_fetcher(),
    );
    let broker = MemoryBroker::default();
    broker.publish("data-ingesting", ingest_body("in-3")).await.unwrap();

    assert_eq!(router.run_until_idle(&broker).await.unwrap(), vec![Outcome::DeadLettered]);

    let dead = broker.dead_letters();
    assert_eq!(dead[0].attempt, 1);
    assert!(dead[0].reason.contains("invalid job id name"));
}
