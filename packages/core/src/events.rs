//! Event types for observing the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, Stage};

/// Events emitted by the consumer as it polls and processes jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Poll events
    /// A batch was received from the broker.
    BatchReceived {
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// Every job of a batch has reached a terminal outcome.
    BatchDrained {
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// The broker could not be reached.
    PollFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A job started executing.
    JobStarted {
        message_id: MessageId,
        input_key: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A job completed all stages.
    JobSucceeded {
        message_id: MessageId,
        output_key: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed at some stage.
    JobFailed {
        message_id: MessageId,
        stage: Stage,
        cause: String,
        retryable: bool,
        will_redeliver: bool,
        timestamp: DateTime<Utc>,
    },
    /// A job's message was deleted from the broker.
    JobAcknowledged {
        message_id: MessageId,
        timestamp: DateTime<Utc>,
    },
    /// Deleting a job's message failed; it will be redelivered.
    AckFailed {
        message_id: MessageId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the message ID associated with this event, if any.
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            JobEvent::JobStarted { message_id, .. } => Some(message_id),
            JobEvent::JobSucceeded { message_id, .. } => Some(message_id),
            JobEvent::JobFailed { message_id, .. } => Some(message_id),
            JobEvent::JobAcknowledged { message_id, .. } => Some(message_id),
            JobEvent::AckFailed { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::BatchReceived { count, .. } => format!("Received batch of {}", count),
            JobEvent::BatchDrained { count, .. } => format!("Drained batch of {}", count),
            JobEvent::PollFailed { error, .. } => format!("Poll failed: {}", error),
            JobEvent::JobStarted {
                message_id,
                input_key,
                ..
            } => {
                let key = input_key.as_deref().unwrap_or("<empty>");
                format!("Job {} started for {}", message_id, key)
            }
            JobEvent::JobSucceeded {
                message_id,
                output_key,
                duration_ms,
                ..
            } => format!(
                "Job {} wrote {} in {}ms",
                message_id, output_key, duration_ms
            ),
            JobEvent::JobFailed {
                message_id,
                stage,
                cause,
                will_redeliver,
                ..
            } => {
                let retry = if *will_redeliver { " (will redeliver)" } else { "" };
                format!("Job {} failed at {}: {}{}", message_id, stage, cause, retry)
            }
            JobEvent::JobAcknowledged { message_id, .. } => {
                format!("Job {} acknowledged", message_id)
            }
            JobEvent::AckFailed {
                message_id, error, ..
            } => format!("Job {} ack failed: {}", message_id, error),
        }
    }
}
