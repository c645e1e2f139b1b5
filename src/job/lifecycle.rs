use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{DocumentStore, StoreError};

use super::model::{JobRecord, Stage};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no {stage} job record for job {job_id}")]
    MissingRecord { stage: Stage, job_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Store failures that a retry cannot fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            LifecycleError::Store(e) => e.is_permanent(),
            LifecycleError::MissingRecord { .. } => false,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Outcome of a terminal status write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record moved to the requested state.
    Applied(JobRecord),
    /// The record was already terminal and was left untouched.
    AlreadyTerminal(JobRecord),
}

/// Status transitions of job records, one record per job id and stage collection.
///
/// Every update re-reads the record first; a job that was never registered cannot be moved.
#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn DocumentStore>,
}

impl JobLifecycle {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Persist a `queued` record unless one already exists; returns the current record.
    pub async fn register(&self, stage: Stage, job_id: &str) -> LifecycleResult<JobRecord> {
        if let Some(existing) = self.store.find_one(stage.collection(), job_id).await? {
            debug!(%stage, job_id, status = %existing.status, "job already registered");
            return Ok(existing);
        }
        let record = JobRecord::queued(job_id);
        self.store.upsert(stage.collection(), &record).await?;
        info!(%stage, job_id, "job registered");
        Ok(record)
    }

    pub async fn lookup(&self, stage: Stage, job_id: &str) -> LifecycleResult<JobRecord> {
        self.store
            .find_one(stage.collection(), job_id)
            .await?
            .ok_or_else(|| LifecycleError::MissingRecord {
                stage,
                job_id: job_id.to_string(),
            })
    }

    pub async fn complete(
        &self,
        stage: Stage,
        job_id: &str,
        result: serde_json::Value,
    ) -> LifecycleResult<Transition> {
        let current = self.lookup(stage, job_id).await?;
        match current.complete(result) {
            Ok(next) => {
                self.store.upsert(stage.collection(), &next).await?;
                info!(%stage, job_id, "job complete");
                Ok(Transition::Applied(next))
            }
            Err(e) => {
                warn!(%stage, job_id, error = %e, "completion ignored");
                Ok(Transition::AlreadyTerminal(current))
            }
        }
    }

    pub async fn fail(&self, stage: Stage, job_id: &str, message: &str) -> LifecycleResult<Transition> {
        let current = self.lookup(stage, job_id).await?;
        match current.fail(message) {
            Ok(next) => {
                self.store.upsert(stage.collection(), &next).await?;
                warn!(%stage, job_id, message, "job failed");
                Ok(Transition::Applied(next))
            }
            Err(e) => {
                warn!(%stage, job_id, error = %e, "failure ignored");
                Ok(Transition::AlreadyTerminal(current))
            }
        }
    }
}
