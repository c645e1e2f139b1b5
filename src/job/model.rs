use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline phase a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Load,
    Clean,
    Join,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Load, Stage::Clean, Stage::Join];

    /// Broker queue the stage consumes.
    pub fn queue(self) -> &'static str {
        match self {
            Stage::Ingest => "data-ingesting",
            Stage::Load => "data-loading",
            Stage::Clean => "data-cleaning",
            Stage::Join => "join",
        }
    }

    /// Document-store collection holding the stage's job records.
    pub fn collection(self) -> &'static str {
        match self {
            Stage::Ingest => "DataIngesting",
            Stage::Load => "DataLoading",
            Stage::Clean => "DataCleaning",
            Stage::Join => "Join",
        }
    }

    pub fn from_queue(queue: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.queue() == queue)
    }

    /// Queue names of every stage, in routing priority order.
    pub fn queues() -> [&'static str; 4] {
        Stage::ALL.map(Stage::queue)
    }

    /// Whether the stage persists a `queued` record itself before doing any work.
    pub fn registers_on_receipt(self) -> bool {
        matches!(self, Stage::Ingest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Load => "load",
            Stage::Clean => "clean",
            Stage::Join => "join",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s || stage.queue() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job status cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued)
    }

    /// `queued -> complete | error`; terminal states never change.
    pub fn transition(self, to: JobStatus) -> Result<JobStatus, InvalidTransition> {
        match (self, to) {
            (JobStatus::Queued, JobStatus::Complete | JobStatus::Error) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        })
    }
}

/// Status record persisted per job and stage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "job-id")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn queued(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            result: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(&self, result: serde_json::Value) -> Result<Self, InvalidTransition> {
        Ok(Self {
            status: self.status.transition(JobStatus::Complete)?,
            result: Some(result),
            message: None,
            updated_at: Utc::now().max(self.created_at),
            ..self.clone()
        })
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<Self, InvalidTransition> {
        Ok(Self {
            status: self.status.transition(JobStatus::Error)?,
            result: None,
            message: Some(message.into()),
            updated_at: Utc::now().max(self.created_at),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("blob reference must look like `bucket/path`, got {0:?}")]
pub struct InvalidBlobRef(pub String);

/// `bucket/path` reference to an object or a directory of objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef {
    pub bucket: String,
    /// Key or key prefix without leading/trailing `/`; empty for the bucket root.
    pub path: String,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into().trim_matches('/').to_string(),
        }
    }

    /// Key of `name` inside this directory.
    pub fn child(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    /// Prefix matching the objects inside this directory.
    pub fn dir_prefix(&self) -> String {
        self.child("")
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl FromStr for BlobRef {
    type Err = InvalidBlobRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((bucket, path)) if !bucket.is_empty() => Ok(BlobRef::new(bucket, path)),
            None if !trimmed.is_empty() => Ok(BlobRef::new(trimmed, "")),
            _ => Err(InvalidBlobRef(s.to_string())),
        }
    }
}

impl TryFrom<String> for BlobRef {
    type Error = InvalidBlobRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlobRef> for String {
    fn from(value: BlobRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.bucket)
        } else {
            write!(f, "{}/{}", self.bucket, self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_change() {
        assert_eq!(JobStatus::Queued.transition(JobStatus::Complete), Ok(JobStatus::Complete));
        assert_eq!(JobStatus::Queued.transition(JobStatus::Error), Ok(JobStatus::Error));
        for from in [JobStatus::Complete, JobStatus::Error] {
            for to in [JobStatus::Queued, JobStatus::Complete, JobStatus::Error] {
                assert!(from.transition(to).is_err());
            }
        }
        assert!(JobStatus::Queued.transition(JobStatus::Queued).is_err());
    }

    #[test]
    fn record_wire_shape() {
        let record = JobRecord::queued("42").fail("boom").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["job-id"], "42");
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
        assert!(json.get("result").is_none());
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn stages_map_to_queues_and_collections() {
        assert_eq!(Stage::from_queue("data-cleaning"), Some(Stage::Clean));
        assert_eq!(Stage::from_queue("visualization"), None);
        assert_eq!(Stage::Load.collection(), "DataLoading");
        assert_eq!("join".parse::<Stage>(), Ok(Stage::Join));
        assert_eq!("data-ingesting".parse::<Stage>(), Ok(Stage::Ingest));
    }

    #[test]
    fn blob_refs() {
        let r: BlobRef = "bucket/raw/2024/".parse().unwrap();
        assert_eq!(r.bucket, "bucket");
        assert_eq!(r.path, "raw/2024");
        assert_eq!(r.child("a.csv"), "raw/2024/a.csv");
        assert_eq!(r.dir_prefix(), "raw/2024/");
        assert_eq!(r.to_string(), "bucket/raw/2024");

        let root: BlobRef = "bucket".parse().unwrap();
        assert_eq!(root.child("a.csv"), "a.csv");
        assert_eq!(root.dir_prefix(), "");

        assert!("".parse::<BlobRef>().is_err());
        assert!("/".parse::<BlobRef>().is_err());
    }
}
