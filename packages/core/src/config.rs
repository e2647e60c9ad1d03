//! Process configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::OutputKeys;

/// Configuration errors. Any of these stops the process at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}={value}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Broker polling behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum job references requested per poll (broker limit: 10).
    pub batch_size: u32,
    /// Long-poll wait per receive call.
    pub wait: Duration,
    /// How long a delivered message stays hidden before redelivery.
    ///
    /// This is the only retry delay in the system. It must exceed the
    /// worst-case pipeline latency or a job may run twice concurrently.
    pub visibility_timeout: Duration,
    /// Delay before polling again after the broker was unreachable.
    pub poll_backoff: Duration,
    /// Jobs allowed to run concurrently.
    pub max_in_flight: usize,
    /// Acknowledge non-retryable failures instead of waiting for redelivery.
    pub ack_unretryable: bool,
}

impl ConsumerConfig {
    pub const MAX_BATCH_SIZE: u32 = 10;
    pub const MAX_WAIT: Duration = Duration::from_secs(20);
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
            poll_backoff: Duration::from_secs(10),
            max_in_flight: 10,
            ack_unretryable: false,
        }
    }
}

/// Everything the worker process needs at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Broker queue identifier (SQS queue URL).
    pub queue_url: String,
    /// Bucket holding input artifacts.
    pub input_bucket: String,
    /// Bucket receiving converted output.
    pub output_bucket: String,
    pub output_keys: OutputKeys,
    /// Timeout applied to each object store call; `None` waits indefinitely.
    pub io_timeout: Option<Duration>,
    pub consumer: ConsumerConfig,
}

impl PipelineConfig {
    pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

    /// Build a config from environment variables.
    ///
    /// Required:
    /// - `SQS_QUEUE_URL`
    /// - `S3_INPUT_BUCKET_NAME`
    /// - `S3_OUTPUT_BUCKET_NAME`
    ///
    /// Optional:
    /// - `POLL_BATCH_SIZE` (default: 10, 1..=10)
    /// - `POLL_WAIT_SECONDS` (default: 20, 0..=20)
    /// - `VISIBILITY_TIMEOUT_SECONDS` (default: 300)
    /// - `POLL_BACKOFF_SECONDS` (default: 10)
    /// - `MAX_IN_FLIGHT` (default: the batch size)
    /// - `IO_TIMEOUT_SECONDS` (default: 60, `0` disables)
    /// - `OUTPUT_PREFIX` (default: `json-output/`)
    /// - `ACK_UNRETRYABLE` (`true`/`false`, default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`PipelineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).and_then(non_empty);
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let queue_url = required("SQS_QUEUE_URL")?;
        let input_bucket = required("S3_INPUT_BUCKET_NAME")?;
        let output_bucket = required("S3_OUTPUT_BUCKET_NAME")?;

        let defaults = ConsumerConfig::default();

        let batch_size = match get("POLL_BATCH_SIZE") {
            Some(v) => {
                let max = u64::from(ConsumerConfig::MAX_BATCH_SIZE);
                parse_in_range("POLL_BATCH_SIZE", v, 1, max)? as u32
            }
            None => defaults.batch_size,
        };
        let wait = match get("POLL_WAIT_SECONDS") {
            Some(v) => Duration::from_secs(parse_in_range(
                "POLL_WAIT_SECONDS",
                v,
                0,
                ConsumerConfig::MAX_WAIT.as_secs(),
            )?),
            None => defaults.wait,
        };
        let visibility_timeout = match get("VISIBILITY_TIMEOUT_SECONDS") {
            Some(v) => {
                Duration::from_secs(parse_in_range("VISIBILITY_TIMEOUT_SECONDS", v, 1, 43_200)?)
            }
            None => defaults.visibility_timeout,
        };
        let poll_backoff = match get("POLL_BACKOFF_SECONDS") {
            Some(v) => {
                Duration::from_secs(parse_in_range("POLL_BACKOFF_SECONDS", v, 0, u64::MAX)?)
            }
            None => defaults.poll_backoff,
        };
        let max_in_flight = match get("MAX_IN_FLIGHT") {
            Some(v) => parse_in_range("MAX_IN_FLIGHT", v, 1, u64::MAX)? as usize,
            None => batch_size as usize,
        };
        let io_timeout = match get("IO_TIMEOUT_SECONDS") {
            Some(v) => match parse_in_range("IO_TIMEOUT_SECONDS", v, 0, u64::MAX)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => Some(Self::DEFAULT_IO_TIMEOUT),
        };
        let ack_unretryable = match get("ACK_UNRETRYABLE") {
            Some(v) => parse_bool("ACK_UNRETRYABLE", v)?,
            None => defaults.ack_unretryable,
        };
        let output_keys = get("OUTPUT_PREFIX")
            .map(OutputKeys::new)
            .unwrap_or_default();

        Ok(Self {
            queue_url,
            input_bucket,
            output_bucket,
            output_keys,
            io_timeout,
            consumer: ConsumerConfig {
                batch_size,
                wait,
                visibility_timeout,
                poll_backoff,
                max_in_flight,
                ack_unretryable,
            },
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_in_range(
    var: &'static str,
    value: String,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let parsed: u64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            var,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::Invalid {
            var,
            value,
            reason: format!("expected {min}..={max}"),
        });
    }
    Ok(parsed)
}

/// Parse a boolean flag value (`true`/`false`, `1`/`0`, `yes`/`no`, `y`/`n`).
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    parse_flag(&value).ok_or_else(|| ConfigError::Invalid {
        var,
        value,
        reason: "expected true/false".to_string(),
    })
}
