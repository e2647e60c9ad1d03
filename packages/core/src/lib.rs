//! Core domain types for the document pipeline.
//!
//! This crate contains shared types used across all packages:
//! - JobReference for units of work delivered by the broker
//! - JobOutcome and Disposition for the result of one delivery attempt
//! - Events and stats for observing the consumer
//! - Process configuration and output-key derivation

mod config;
mod events;
mod job;
mod keys;
mod outcome;
mod stats;

pub use config::{ConfigError, ConsumerConfig, PipelineConfig, parse_flag};
pub use events::JobEvent;
pub use job::{JobReference, MessageId, ReceiptToken};
pub use keys::OutputKeys;
pub use outcome::{Disposition, JobFailure, JobOutcome, Stage};
pub use stats::ConsumerStats;
