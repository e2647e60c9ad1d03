//! Concurrent execution of one received batch.

use std::sync::Arc;
use std::time::Instant;

use broker::Broker;
use chrono::Utc;
use docpipe_core::{Disposition, JobEvent, JobFailure, JobOutcome, JobReference, MessageId};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

use crate::runner::JobRunner;

/// What happened to a delivery at the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    /// The message was deleted.
    Acknowledged,
    /// The delete call failed; the message will come back.
    Failed(String),
    /// No broker action; the visibility window will lapse.
    Redeliver,
}

/// Terminal result of one job reference.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub message_id: MessageId,
    pub outcome: JobOutcome,
    pub ack: AckStatus,
}

/// All reports of a drained batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub reports: Vec<JobReport>,
    /// Job tasks that died without a report. Their messages are redelivered.
    pub panicked: u64,
}

/// Fans a batch out to the job runner, at most `max_in_flight` at a time.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    runner: Arc<JobRunner>,
    limit: Arc<Semaphore>,
    ack_unretryable: bool,
    event_tx: broadcast::Sender<JobEvent>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        runner: Arc<JobRunner>,
        max_in_flight: usize,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            broker,
            runner,
            limit: Arc::new(Semaphore::new(max_in_flight.max(1))),
            ack_unretryable: false,
            event_tx,
        }
    }

    pub fn with_ack_unretryable(mut self, enabled: bool) -> Self {
        self.ack_unretryable = enabled;
        self
    }

    /// Run every job of `batch` and wait until all of them are done.
    pub async fn dispatch(&self, batch: Vec<JobReference>) -> BatchReport {
        let mut set = JoinSet::new();
        for job in batch {
            // A permit is taken before spawning so at most `max_in_flight` tasks exist.
            let permit = self.limit.clone().acquire_owned().await.ok();
            let this = self.clone();
            set.spawn(async move {
                let report = this.process(job).await;
                drop(permit);
                report
            });
        }

        let mut drained = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => drained.reports.push(report),
                Err(e) => {
                    tracing::error!("Job task did not complete: {}", e);
                    drained.panicked += 1;
                }
            }
        }
        drained
    }

    /// Process one job reference to a terminal outcome and settle it with the broker.
    pub async fn process(&self, job: JobReference) -> JobReport {
        let started = Instant::now();
        let message_id = job.message_id.clone();
        let input_key = job.input_key().map(str::to_string);

        self.emit(JobEvent::JobStarted {
            message_id: message_id.clone(),
            input_key: input_key.clone(),
            timestamp: Utc::now(),
        });

        let (outcome, disposition) = match &input_key {
            // Retrying an empty payload cannot help, so it is deleted right away.
            None => (
                JobOutcome::from(JobFailure::empty_payload()),
                Disposition::Acknowledge,
            ),
            Some(key) => {
                let outcome = self.runner.run(key).await;
                let disposition = outcome.disposition(self.ack_unretryable);
                (outcome, disposition)
            }
        };

        match &outcome {
            JobOutcome::Success { output_key } => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!("Job {} wrote {} in {}ms", message_id, output_key, duration_ms);
                self.emit(JobEvent::JobSucceeded {
                    message_id: message_id.clone(),
                    output_key: output_key.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            JobOutcome::Failure(failure) => {
                tracing::warn!(
                    "Job {} failed at {}: {}",
                    message_id,
                    failure.stage,
                    failure.cause
                );
                self.emit(JobEvent::JobFailed {
                    message_id: message_id.clone(),
                    stage: failure.stage,
                    cause: failure.cause.clone(),
                    retryable: failure.retryable,
                    will_redeliver: disposition == Disposition::Redeliver,
                    timestamp: Utc::now(),
                });
            }
        }

        let ack = match disposition {
            Disposition::Acknowledge => self.acknowledge(&job).await,
            Disposition::Redeliver => AckStatus::Redeliver,
        };

        JobReport {
            message_id,
            outcome,
            ack,
        }
    }

    /// Delete once. A failed delete is reported, never retried.
    async fn acknowledge(&self, job: &JobReference) -> AckStatus {
        match self.broker.delete(&job.receipt).await {
            Ok(()) => {
                tracing::debug!("Deleted message {}", job.message_id);
                self.emit(JobEvent::JobAcknowledged {
                    message_id: job.message_id.clone(),
                    timestamp: Utc::now(),
                });
                AckStatus::Acknowledged
            }
            Err(e) => {
                tracing::error!(
                    "Failed to delete message {}, it will be reprocessed: {}",
                    job.message_id,
                    e
                );
                self.emit(JobEvent::AckFailed {
                    message_id: job.message_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                AckStatus::Failed(e.to_string())
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
