//! Outcome of processing one job reference.

use serde::{Deserialize, Serialize};

/// Pipeline stage a job can fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transform,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: Stage,
    pub cause: String,
    /// Whether a redelivery could plausibly succeed.
    ///
    /// Transport failures against the store are retryable; malformed input
    /// fails identically on every delivery.
    pub retryable: bool,
}

impl JobFailure {
    pub fn new(stage: Stage, cause: impl Into<String>, retryable: bool) -> Self {
        Self {
            stage,
            cause: cause.into(),
            retryable,
        }
    }

    pub fn fetch(cause: impl Into<String>) -> Self {
        Self::new(Stage::Fetch, cause, true)
    }

    pub fn transform(cause: impl Into<String>) -> Self {
        Self::new(Stage::Transform, cause, false)
    }

    pub fn persist(cause: impl Into<String>) -> Self {
        Self::new(Stage::Persist, cause, true)
    }

    /// A delivery with no usable payload. Never worth redelivering.
    pub fn empty_payload() -> Self {
        Self::new(Stage::Fetch, "empty payload", false)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.cause)
    }
}

/// Tagged result of one delivery attempt. Never retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Fetch, Transform and Persist all completed.
    Success { output_key: String },
    Failure(JobFailure),
}

impl JobOutcome {
    pub fn success(output_key: impl Into<String>) -> Self {
        JobOutcome::Success {
            output_key: output_key.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failure(failure) => Some(failure),
            JobOutcome::Success { .. } => None,
        }
    }

    /// What the consumer does with the delivery given this outcome.
    ///
    /// Only a success is acknowledged, unless `ack_unretryable` is set, in
    /// which case non-retryable failures are acknowledged too instead of
    /// cycling through redelivery until the broker dead-letters them.
    pub fn disposition(&self, ack_unretryable: bool) -> Disposition {
        match self {
            JobOutcome::Success { .. } => Disposition::Acknowledge,
            JobOutcome::Failure(failure) if ack_unretryable && !failure.retryable => {
                Disposition::Acknowledge
            }
            JobOutcome::Failure(_) => Disposition::Redeliver,
        }
    }
}

impl From<JobFailure> for JobOutcome {
    fn from(failure: JobFailure) -> Self {
        JobOutcome::Failure(failure)
    }
}

/// Broker action taken for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Delete the message using its receipt token.
    Acknowledge,
    /// Take no action; the visibility window lapses and the broker redelivers.
    Redeliver,
}
