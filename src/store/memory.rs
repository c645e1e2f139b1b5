//! In-process adapters for all three ports.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::job::JobRecord;

use super::{BlobStore, Broker, Delivery, DocumentStore, StoreError, StoreResult};

fn poisoned(what: &str) -> StoreError {
    StoreError::Broker(format!("{what} lock poisoned"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Buckets of objects kept in sorted maps.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let buckets = self.buckets.lock().ok()?;
        buckets.get(bucket)?.get(key).cloned()
    }

    /// Every key in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        match self.buckets.lock() {
            Ok(buckets) => buckets
                .get(bucket)
                .map(|objects| objects.keys().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let buckets = self.buckets.lock().map_err(|_| poisoned("blob"))?;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.lock().map_err(|_| poisoned("blob"))?;
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let buckets = self.buckets.lock().map_err(|_| poisoned("blob"))?;
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, HashMap<String, JobRecord>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(collection).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(&self, collection: &str, job_id: &str) -> StoreResult<Option<JobRecord>> {
        let collections = self
            .collections
            .lock()
            .map_err(|_| StoreError::Document("lock poisoned".into()))?;
        Ok(collections.get(collection).and_then(|c| c.get(job_id)).cloned())
    }

    async fn upsert(&self, collection: &str, record: &JobRecord) -> StoreResult<()> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| StoreError::Document("lock poisoned".into()))?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Pending {
    body: Vec<u8>,
    attempt: u32,
}

/// A message that was dead-lettered, with the reason given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub body: Vec<u8>,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Pending>>,
    in_flight: HashMap<u64, Delivery>,
    dead: Vec<DeadLetter>,
    next_tag: u64,
}

/// Queues held in memory; nothing survives the process.
#[derive(Debug)]
pub struct MemoryBroker {
    prefetch: usize,
    state: Mutex<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemoryBroker {
    pub fn new(prefetch: usize) -> Self {
        Self {
            prefetch: prefetch.max(1),
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Messages waiting in `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.queues.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    fn settle(&self, tag: u64) -> StoreResult<(std::sync::MutexGuard<'_, BrokerState>, Delivery)> {
        let mut state = self.state.lock().map_err(|_| poisoned("broker"))?;
        let delivery = state
            .in_flight
            .remove(&tag)
            .ok_or(StoreError::UnknownDelivery(tag))?;
        Ok((state, delivery))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, body: Vec<u8>) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned("broker"))?;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Pending { body, attempt: 1 });
        Ok(())
    }

    async fn next_delivery(&self, queues: &[&str]) -> StoreResult<Option<Delivery>> {
        let mut state = self.state.lock().map_err(|_| poisoned("broker"))?;
        if state.in_flight.len() >= self.prefetch {
            return Ok(None);
        }

        for queue in queues {
            let Some(pending) = state.queues.get_mut(*queue).and_then(VecDeque::pop_front) else {
                continue;
            };
            state.next_tag += 1;
            let delivery = Delivery {
                tag: state.next_tag,
                queue: queue.to_string(),
                body: pending.body,
                attempt: pending.attempt,
            };
            state.in_flight.insert(delivery.tag, delivery.clone());
            return Ok(Some(delivery));
        }
        Ok(None)
    }

    async fn ack(&self, tag: u64) -> StoreResult<()> {
        self.settle(tag).map(|_| ())
    }

    async fn requeue(&self, tag: u64) -> StoreResult<()> {
        let (mut state, delivery) = self.settle(tag)?;
        state
            .queues
            .entry(delivery.queue)
            .or_default()
            .push_front(Pending {
                body: delivery.body,
                attempt: delivery.attempt + 1,
            });
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, reason: &str) -> StoreResult<()> {
        let (mut state, delivery) = self.settle(tag)?;
        state.dead.push(DeadLetter {
            queue: delivery.queue,
            body: delivery.body,
            attempt: delivery.attempt,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
