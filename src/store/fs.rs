//! File-backed adapters for single-host deployments.
//!
//! Layouts:
//!
//! ```text
//! <jobs-dir>/<collection>/<escaped-job-id>.json    one record per job
//! <spool-dir>/<queue>/<stamp>-<id>.<attempt>.msg   waiting messages, oldest first
//! <spool-dir>/<queue>/.in-flight/...               delivered, not yet settled
//! <spool-dir>/.dead-letter/<queue>/...             parked messages plus a `.reason` file
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::job::JobRecord;

use super::{Broker, Delivery, DocumentStore, StoreError, StoreResult};

const IN_FLIGHT_DIR: &str = ".in-flight";
const DEAD_LETTER_DIR: &str = ".dead-letter";
const MESSAGE_EXT: &str = "msg";

/// Longest escaped job id used verbatim as a file stem.
const MAX_RECORD_STEM: usize = 200;

// Names that are safe to use as a single path component.
fn check_component(kind: &'static str, name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// File stem for a job id.
///
/// Bytes outside `[A-Za-z0-9_-]` are written as `%XX`, so distinct ids get distinct stems.
/// Stems longer than [`MAX_RECORD_STEM`] are replaced by `~<uuid-v5 of the id>`; `~` never
/// appears in an escaped stem. The record itself keeps the original id.
fn record_stem(job_id: &str) -> StoreResult<String> {
    if job_id.is_empty() {
        return Err(StoreError::InvalidName {
            kind: "job id",
            name: String::new(),
        });
    }
    let mut stem = String::with_capacity(job_id.len());
    for b in job_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            stem.push(char::from(b));
        } else {
            let _ = write!(stem, "%{b:02X}");
        }
    }
    if stem.len() > MAX_RECORD_STEM {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, job_id.as_bytes());
        stem = format!("~{}", id.simple());
    }
    Ok(stem)
}

async fn write_atomically(path: &Path, data: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// One JSON file per job record.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "document store opened");
        Ok(Self { root })
    }

    fn record_path(&self, collection: &str, job_id: &str) -> StoreResult<PathBuf> {
        check_component("collection", collection)?;
        let stem = record_stem(job_id)?;
        Ok(self.root.join(collection).join(format!("{stem}.json")))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    #[instrument(skip(self))]
    async fn find_one(&self, collection: &str, job_id: &str) -> StoreResult<Option<JobRecord>> {
        let path = self.record_path(collection, job_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, record), fields(job_id = %record.job_id, status = %record.status))]
    async fn upsert(&self, collection: &str, record: &JobRecord) -> StoreResult<()> {
        let path = self.record_path(collection, &record.job_id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        write_atomically(&path, &serde_json::to_vec_pretty(record)?).await?;
        debug!(path = %path.display(), "job record written");
        Ok(())
    }
}

// `<stamp>-<id>.<attempt>.msg` -> (`<stamp>-<id>`, attempt)
fn parse_message_name(name: &str) -> Option<(&str, u32)> {
    let stem = name.strip_suffix(MESSAGE_EXT)?.strip_suffix('.')?;
    let (id, attempt) = stem.rsplit_once('.')?;
    Some((id, attempt.parse().ok()?))
}

fn message_name(id: &str, attempt: u32) -> String {
    format!("{id}.{attempt}.{MESSAGE_EXT}")
}

#[derive(Debug, Clone)]
struct InFlight {
    queue: String,
    id: String,
    attempt: u32,
}

/// Durable queues kept as files in a spool directory.
///
/// Messages delivered but never settled are moved back into their queue when the spool is
/// reopened, so a crash leads to redelivery.
#[derive(Debug)]
pub struct SpoolBroker {
    root: PathBuf,
    prefetch: usize,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    next_tag: AtomicU64,
    published: AtomicU64,
}

impl SpoolBroker {
    pub async fn open(root: impl Into<PathBuf>, prefetch: usize) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let broker = Self {
            root,
            prefetch: prefetch.max(1),
            in_flight: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(0),
            published: AtomicU64::new(0),
        };
        broker.recover().await?;
        info!(root = %broker.root.display(), prefetch = broker.prefetch, "spool broker opened");
        Ok(broker)
    }

    fn queue_dir(&self, queue: &str) -> StoreResult<PathBuf> {
        check_component("queue", queue)?;
        Ok(self.root.join(queue))
    }

    async fn recover(&self) -> StoreResult<()> {
        let mut queues = fs::read_dir(&self.root).await?;
        while let Some(entry) = queues.next_entry().await? {
            let queue_dir = entry.path();
            let in_flight_dir = queue_dir.join(IN_FLIGHT_DIR);
            if !entry.file_type().await?.is_dir() || !fs::try_exists(&in_flight_dir).await? {
                continue;
            }
            let mut stale = fs::read_dir(&in_flight_dir).await?;
            while let Some(msg) = stale.next_entry().await? {
                let name = msg.file_name();
                warn!(queue_dir = %queue_dir.display(), message = ?name, "returning unsettled message");
                fs::rename(msg.path(), queue_dir.join(&name)).await?;
            }
        }
        Ok(())
    }

    async fn oldest_message(&self, queue_dir: &Path) -> StoreResult<Option<(String, u32)>> {
        if !fs::try_exists(queue_dir).await? {
            return Ok(None);
        }
        let mut oldest: Option<(String, u32)> = None;
        let mut entries = fs::read_dir(queue_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some((id, attempt)) = name.to_str().and_then(parse_message_name) else {
                continue;
            };
            if oldest.as_ref().is_none_or(|(best, _)| id < best.as_str()) {
                oldest = Some((id.to_string(), attempt));
            }
        }
        Ok(oldest)
    }

    fn take_in_flight(&self, tag: u64) -> StoreResult<InFlight> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| StoreError::Broker("lock poisoned".into()))?;
        in_flight.remove(&tag).ok_or(StoreError::UnknownDelivery(tag))
    }

    fn in_flight_path(&self, msg: &InFlight) -> StoreResult<PathBuf> {
        Ok(self
            .queue_dir(&msg.queue)?
            .join(IN_FLIGHT_DIR)
            .join(message_name(&msg.id, msg.attempt)))
    }
}

#[async_trait]
impl Broker for SpoolBroker {
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    async fn publish(&self, queue: &str, body: Vec<u8>) -> StoreResult<()> {
        let dir = self.queue_dir(queue)?;
        fs::create_dir_all(&dir).await?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S%f").to_string();
        let seq = self.published.fetch_add(1, Ordering::Relaxed);
        let id = format!("{stamp}-{seq:08}-{}", Uuid::new_v4().simple());
        write_atomically(&dir.join(message_name(&id, 1)), &body).await?;
        debug!(queue, id = %id, "message published");
        Ok(())
    }

    async fn next_delivery(&self, queues: &[&str]) -> StoreResult<Option<Delivery>> {
        let busy = self
            .in_flight
            .lock()
            .map_err(|_| StoreError::Broker("lock poisoned".into()))?
            .len();
        if busy >= self.prefetch {
            return Ok(None);
        }

        for queue in queues {
            let dir = self.queue_dir(queue)?;
            let Some((id, attempt)) = self.oldest_message(&dir).await? else {
                continue;
            };
            let name = message_name(&id, attempt);
            let in_flight_dir = dir.join(IN_FLIGHT_DIR);
            fs::create_dir_all(&in_flight_dir).await?;
            fs::rename(dir.join(&name), in_flight_dir.join(&name)).await?;
            let body = fs::read(in_flight_dir.join(&name)).await?;

            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            self.in_flight
                .lock()
                .map_err(|_| StoreError::Broker("lock poisoned".into()))?
                .insert(
                    tag,
                    InFlight {
                        queue: queue.to_string(),
                        id,
                        attempt,
                    },
                );
            return Ok(Some(Delivery {
                tag,
                queue: queue.to_string(),
                body,
                attempt,
            }));
        }
        Ok(None)
    }

    async fn ack(&self, tag: u64) -> StoreResult<()> {
        let msg = self.take_in_flight(tag)?;
        fs::remove_file(self.in_flight_path(&msg)?).await?;
        Ok(())
    }

    async fn requeue(&self, tag: u64) -> StoreResult<()> {
        let msg = self.take_in_flight(tag)?;
        let target = self.queue_dir(&msg.queue)?.join(message_name(&msg.id, msg.attempt + 1));
        fs::rename(self.in_flight_path(&msg)?, target).await?;
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, reason: &str) -> StoreResult<()> {
        let msg = self.take_in_flight(tag)?;
        check_component("queue", &msg.queue)?;
        let dir = self.root.join(DEAD_LETTER_DIR).join(&msg.queue);
        fs::create_dir_all(&dir).await?;
        let name = message_name(&msg.id, msg.attempt);
        fs::rename(self.in_flight_path(&msg)?, dir.join(&name)).await?;
        fs::write(dir.join(format!("{name}.reason")), reason).await?;
        warn!(queue = %msg.queue, id = %msg.id, reason, "message dead-lettered");
        Ok(())
    }
}
