//! Runs the fetch, transform, persist pipeline for one job.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use docpipe_core::{JobFailure, JobOutcome, OutputKeys, PipelineConfig};
use storage::ArtifactStore;
use transform::Transform;

/// Executes one job against the object store and a transform.
///
/// Every stage error is reduced to a [`JobOutcome::Failure`]; nothing is
/// retried here. Redelivery by the broker is the only retry path.
pub struct JobRunner {
    store: Arc<dyn ArtifactStore>,
    transform: Arc<dyn Transform>,
    input_bucket: String,
    output_bucket: String,
    output_keys: OutputKeys,
    io_timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        transform: Arc<dyn Transform>,
        input_bucket: impl Into<String>,
        output_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transform,
            input_bucket: input_bucket.into(),
            output_bucket: output_bucket.into(),
            output_keys: OutputKeys::default(),
            io_timeout: None,
        }
    }

    pub fn from_config(
        cfg: &PipelineConfig,
        store: Arc<dyn ArtifactStore>,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self::new(store, transform, &cfg.input_bucket, &cfg.output_bucket)
            .with_output_keys(cfg.output_keys.clone())
            .with_io_timeout(cfg.io_timeout)
    }

    pub fn with_output_keys(mut self, keys: OutputKeys) -> Self {
        self.output_keys = keys;
        self
    }

    /// Bound each object store call. `None` waits indefinitely.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn output_key(&self, input_key: &str) -> String {
        self.output_keys.output_key(input_key)
    }

    /// Run all three stages for `input_key`.
    pub async fn run(&self, input_key: &str) -> JobOutcome {
        match self.execute(input_key).await {
            Ok(output_key) => JobOutcome::success(output_key),
            Err(failure) => failure.into(),
        }
    }

    async fn execute(&self, input_key: &str) -> Result<String, JobFailure> {
        let input = bounded(
            self.io_timeout,
            self.store.get(&self.input_bucket, input_key),
        )
        .await
        .map_err(JobFailure::fetch)?;

        let output = self.convert(input).await?;

        let output_key = self.output_key(input_key);
        bounded(
            self.io_timeout,
            self.store
                .put(&self.output_bucket, &output_key, Bytes::from(output)),
        )
        .await
        .map_err(JobFailure::persist)?;

        Ok(output_key)
    }

    /// Transform is CPU-bound; keep it off the async workers.
    async fn convert(&self, input: Bytes) -> Result<Vec<u8>, JobFailure> {
        let transform = self.transform.clone();
        let joined = tokio::task::spawn_blocking(move || transform.convert(&input)).await;
        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(JobFailure::transform(e.to_string())),
            Err(e) if e.is_panic() => Err(JobFailure::transform(format!(
                "{} panicked",
                self.transform.name()
            ))),
            Err(e) => Err(JobFailure::transform(e.to_string())),
        }
    }
}

async fn bounded<T, E, F>(timeout: Option<Duration>, fut: F) -> Result<T, String>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => return Err(format!("timed out after {}s", limit.as_secs_f64())),
        },
        None => fut.await,
    };
    result.map_err(|e| e.to_string())
}
