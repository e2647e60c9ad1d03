//! Queue consumer and job runner.
//!
//! # Architecture
//!
//! - `JobRunner` - Fetches one input artifact, transforms it, persists the output
//! - `Dispatcher` - Runs a received batch on a bounded set of tasks and settles
//!   each job with the broker
//! - `ConsumerActor` - Owns the poll loop: receive, dispatch, wait for the
//!   batch to drain, poll again
//!
//! A job's message is deleted only after its output has been written. Failed
//! jobs are left alone so the broker redelivers them once their visibility
//! timeout lapses.
//!
//! # Usage
//!
//! ```ignore
//! use consumer::{ConsumerArgs, ConsumerMessage, JobRunner, start_consumer};
//!
//! let runner = Arc::new(JobRunner::from_config(&cfg, store, Arc::new(XmlToJson)));
//! let (consumer, handle) = start_consumer(ConsumerArgs::new(broker, runner, cfg.consumer)).await?;
//!
//! consumer.send_message(ConsumerMessage::Shutdown)?;
//! handle.await?;
//! ```

mod consumer;
mod dispatch;
mod messages;
mod runner;

pub use consumer::{ConsumerActor, ConsumerArgs, ConsumerState, consumer_stats, start_consumer};
pub use dispatch::{AckStatus, BatchReport, Dispatcher, JobReport};
pub use messages::{ConsumerError, ConsumerMessage};
pub use runner::JobRunner;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
