//! Message types for the consumer actor.

use docpipe_core::ConsumerStats;
use ractor::RpcReplyPort;

use crate::dispatch::JobReport;

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage {
    /// Start the next poll cycle.
    Poll,

    /// Every job of the last batch reached a terminal outcome.
    BatchDrained { reports: Vec<JobReport>, panicked: u64 },

    /// The broker could not be reached.
    PollFailed { error: String },

    /// Get consumer stats.
    GetStats { reply: RpcReplyPort<ConsumerStats> },

    /// Stop polling, let in-flight jobs finish, then stop.
    Shutdown,
}

/// Error type for talking to the consumer actor.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}
