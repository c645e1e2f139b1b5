//! Delivery handling and the worker loop.
//!
//! One delivery is handled at a time, to completion. A delivery is acknowledged only after the
//! job's terminal status has been written; when the record cannot be read or written the
//! delivery is requeued until `max_attempts` is reached and then dead-lettered. Store errors
//! that no retry can fix are dead-lettered at once.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::stages::{self, StageContext, StageError};
use crate::store::{Broker, Delivery, StoreError};

use super::lifecycle::{JobLifecycle, LifecycleError};
use super::message::{Envelope, JobMessage};
use super::model::Stage;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to settle delivery: {0}")]
    Settle(#[from] StoreError),
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Job ran and was marked `complete`.
    Completed,
    /// Job ran and was marked `error`.
    Failed,
    /// Job was already terminal; acknowledged without running.
    Skipped,
    /// Status could not be read or written; message returned to its queue.
    Requeued,
    /// Message parked; it will not be redelivered.
    DeadLettered,
}

#[derive(Clone)]
pub struct Router {
    lifecycle: JobLifecycle,
    stages: StageContext,
    max_attempts: u32,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Router {
    pub fn new(lifecycle: JobLifecycle, stages: StageContext, max_attempts: u32) -> Self {
        Self {
            lifecycle,
            stages,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Route one delivery to its stage and settle it on `broker`.
    pub async fn handle(&self, broker: &dyn Broker, delivery: Delivery) -> Result<Outcome, RouteError> {
        let Some(stage) = Stage::from_queue(&delivery.queue) else {
            let reason = format!("no stage consumes queue {}", delivery.queue);
            return self.dead_letter(broker, &delivery, &reason).await;
        };
        let envelope = match Envelope::parse(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => return self.dead_letter(broker, &delivery, &e.to_string()).await,
        };

        let span = info_span!(
            "job",
            %stage,
            job_id = %envelope.job_id,
            attempt = delivery.attempt
        );
        self.process(broker, &delivery, stage, envelope).instrument(span).await
    }

    async fn process(
        &self,
        broker: &dyn Broker,
        delivery: &Delivery,
        stage: Stage,
        envelope: Envelope,
    ) -> Result<Outcome, RouteError> {
        let job_id = envelope.job_id.as_str();
        let record = if stage.registers_on_receipt() {
            self.lifecycle.register(stage, job_id).await
        } else {
            self.lifecycle.lookup(stage, job_id).await
        };
        let record = match record {
            Ok(record) => record,
            Err(e) => return self.retry(broker, delivery, &e).await,
        };

        if record.status.is_terminal() {
            info!(status = %record.status, "job already settled, acknowledging");
            broker.ack(delivery.tag).await?;
            return Ok(Outcome::Skipped);
        }

        info!("job started");
        let result = match JobMessage::from_value(stage, envelope.payload) {
            Ok(message) => AssertUnwindSafe(stages::run(&self.stages, &message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(StageError::Panicked(panic_message(panic)))),
            Err(e) => Err(e.into()),
        };

        let (written, outcome) = match result {
            Ok(payload) => (
                self.lifecycle.complete(stage, job_id, payload).await,
                Outcome::Completed,
            ),
            Err(e) => {
                error!(error = %e, "job failed");
                (
                    self.lifecycle.fail(stage, job_id, &e.to_string()).await,
                    Outcome::Failed,
                )
            }
        };

        match written {
            Ok(_) => {
                broker.ack(delivery.tag).await?;
                Ok(outcome)
            }
            Err(e) => self.retry(broker, delivery, &e).await,
        }
    }

    async fn retry(
        &self,
        broker: &dyn Broker,
        delivery: &Delivery,
        error: &LifecycleError,
    ) -> Result<Outcome, RouteError> {
        let reason = error.to_string();
        let reason = reason.as_str();
        if error.is_permanent() {
            self.dead_letter(broker, delivery, reason).await
        } else if delivery.attempt < self.max_attempts {
            warn!(reason, attempt = delivery.attempt, "requeueing delivery");
            broker.requeue(delivery.tag).await?;
            Ok(Outcome::Requeued)
        } else {
            let reason = format!("gave up after {} attempts: {reason}", delivery.attempt);
            self.dead_letter(broker, delivery, &reason).await
        }
    }

    async fn dead_letter(&self, broker: &dyn Broker, delivery: &Delivery, reason: &str) -> Result<Outcome, RouteError> {
        error!(queue = %delivery.queue, tag = delivery.tag, reason, "dead-lettering delivery");
        broker.dead_letter(delivery.tag, reason).await?;
        Ok(Outcome::DeadLettered)
    }

    /// Take and handle the next delivery from any stage queue.
    pub async fn poll_once(&self, broker: &dyn Broker) -> Result<Option<Outcome>, RouteError> {
        match broker.next_delivery(&Stage::queues()).await? {
            Some(delivery) => self.handle(broker, delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Handle deliveries until every stage queue is empty.
    pub async fn run_until_idle(&self, broker: &dyn Broker) -> Result<Vec<Outcome>, RouteError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.poll_once(broker).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Consume every stage queue until `shutdown` resolves.
    ///
    /// A delivery in progress always runs to completion; `shutdown` is only observed between
    /// deliveries. Broker failures are logged and retried after `poll_interval`.
    pub async fn run(&self, broker: &dyn Broker, poll_interval: Duration, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let queues = Stage::queues();
        info!(?queues, max_attempts = self.max_attempts, "worker started");

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => break,
                next = broker.next_delivery(&queues) => next,
            };

            let idle = match next {
                Ok(Some(delivery)) => {
                    match self.handle(broker, delivery).await {
                        Ok(outcome) => debug!(?outcome, "delivery settled"),
                        Err(e) => error!(error = %e, "delivery left unsettled"),
                    }
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(error = %e, "broker request failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!("worker stopped");
    }
}
