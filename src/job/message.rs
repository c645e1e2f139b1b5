//! Inbound message payloads, one shape per stage.
//!
//! Keys follow the broker protocol (`job-id`, `minio-input`, ...). `job-id` may be sent as a
//! string or an integer; it is always handled as a string.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processing::JoinMode;

use super::model::{BlobRef, Stage};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("payload is not a JSON document: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("payload has no usable job-id")]
    MissingJobId,

    #[error("invalid {stage} payload: {source}")]
    Invalid {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
}

fn job_id_from(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_job_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    job_id_from(&value).ok_or_else(|| de::Error::custom(format!("invalid job-id: {value}")))
}

/// Raw payload with its job id extracted.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub job_id: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Parse just enough of a delivery body to identify the job.
    pub fn parse(body: &[u8]) -> Result<Self, MessageError> {
        let payload: serde_json::Value = serde_json::from_slice(body).map_err(MessageError::NotJson)?;
        let job_id = payload
            .get("job-id")
            .and_then(job_id_from)
            .ok_or(MessageError::MissingJobId)?;
        Ok(Self { job_id, payload })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(rename = "first-line-labels", default = "default_true")]
    pub first_line_labels: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMessage {
    #[serde(rename = "job-id", deserialize_with = "deserialize_job_id")]
    pub job_id: String,
    #[serde(rename = "minio-output")]
    pub output: BlobRef,
    pub ingestion_json: IngestionRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMessage {
    #[serde(rename = "job-id", deserialize_with = "deserialize_job_id")]
    pub job_id: String,
    #[serde(rename = "minio-input")]
    pub input: BlobRef,
    #[serde(rename = "minio-output")]
    pub output: BlobRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanMessage {
    #[serde(rename = "job-id", deserialize_with = "deserialize_job_id")]
    pub job_id: String,
    #[serde(rename = "minio-input")]
    pub input: BlobRef,
    #[serde(rename = "minio-output")]
    pub output: BlobRef,
    /// Falls back to the worker's configured default when absent.
    #[serde(rename = "max-shrink", default, skip_serializing_if = "Option::is_none")]
    pub max_shrink: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMessage {
    #[serde(rename = "job-id", deserialize_with = "deserialize_job_id")]
    pub job_id: String,
    pub column: String,
    #[serde(rename = "type")]
    pub mode: JoinMode,
    pub inputs: Vec<BlobRef>,
    pub output: BlobRef,
}

/// A fully typed job request.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    Ingest(IngestMessage),
    Load(LoadMessage),
    Clean(CleanMessage),
    Join(JoinMessage),
}

impl JobMessage {
    pub fn from_value(stage: Stage, payload: serde_json::Value) -> Result<Self, MessageError> {
        let invalid = |source| MessageError::Invalid { stage, source };
        Ok(match stage {
            Stage::Ingest => JobMessage::Ingest(serde_json::from_value(payload).map_err(invalid)?),
            Stage::Load => JobMessage::Load(serde_json::from_value(payload).map_err(invalid)?),
            Stage::Clean => JobMessage::Clean(serde_json::from_value(payload).map_err(invalid)?),
            Stage::Join => JobMessage::Join(serde_json::from_value(payload).map_err(invalid)?),
        })
    }

    pub fn stage(&self) -> Stage {
        match self {
            JobMessage::Ingest(_) => Stage::Ingest,
            JobMessage::Load(_) => Stage::Load,
            JobMessage::Clean(_) => Stage::Clean,
            JobMessage::Join(_) => Stage::Join,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobMessage::Ingest(m) => &m.job_id,
            JobMessage::Load(m) => &m.job_id,
            JobMessage::Clean(m) => &m.job_id,
            JobMessage::Join(m) => &m.job_id,
        }
    }
}
