//! Message broker clients.
//!
//! The consumer only needs two broker operations: receive a batch of job
//! references with a visibility timeout, and delete one by receipt token.
//! Anything not deleted before its visibility window lapses is redelivered by
//! the broker, which is the pipeline's whole retry mechanism.
//!
//! - `SqsBroker` talks to AWS SQS
//! - `InMemoryBroker` simulates the same contract in-process for dev and tests

mod error;
mod memory;
mod sqs;

use std::time::Duration;

use docpipe_core::{ConsumerConfig, JobReference, ReceiptToken};
use futures_util::future::BoxFuture;

pub use error::BrokerError;
pub use memory::InMemoryBroker;
pub use sqs::SqsBroker;

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Upper bound on references returned.
    pub max_messages: u32,
    /// Long-poll wait; the call returns early as soon as anything is visible.
    pub wait: Duration,
    /// How long delivered references stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl From<&ConsumerConfig> for ReceiveRequest {
    fn from(cfg: &ConsumerConfig) -> Self {
        Self {
            max_messages: cfg.batch_size,
            wait: cfg.wait,
            visibility_timeout: cfg.visibility_timeout,
        }
    }
}

/// Queue client used by the consumer.
///
/// Implementations are shared by the poll loop and every job task.
pub trait Broker: Send + Sync + 'static {
    /// Receive up to `max_messages` references. An empty batch is not an error.
    fn receive_batch(
        &self,
        request: ReceiveRequest,
    ) -> BoxFuture<'_, Result<Vec<JobReference>, BrokerError>>;

    /// Acknowledge one delivery. The message is never delivered again.
    fn delete<'a>(&'a self, receipt: &'a ReceiptToken) -> BoxFuture<'a, Result<(), BrokerError>>;
}

/// Clamp a duration to the whole seconds the SQS API accepts.
pub(crate) fn whole_seconds(d: Duration) -> i32 {
    i32::try_from(d.as_secs()).unwrap_or(i32::MAX)
}
