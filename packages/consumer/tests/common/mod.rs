#![allow(dead_code)]

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use broker::{Broker, BrokerError, InMemoryBroker, ReceiveRequest};
use bytes::Bytes;
use consumer::JobRunner;
use docpipe_core::{ConsumerConfig, JobEvent, JobReference, ReceiptToken};
use futures_util::future::BoxFuture;
use storage::{ArtifactStore, Storage, StorageConfig, StorageError};
use tokio::sync::broadcast;
use transform::XmlToJson;

pub const INPUT: &str = "xml-input";
pub const OUTPUT: &str = "json-output";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered record of store and broker calls shared by the test doubles.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        lock(&self.0).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.0).iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e.starts_with(prefix))
    }
}

/// In-memory storage that records calls and can be told to fail or stall.
pub struct RecordingStore {
    inner: Storage,
    log: CallLog,
    get_failures: Mutex<HashMap<String, u32>>,
    fail_puts: AtomicBool,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingStore {
    pub fn new(log: CallLog) -> Result<Self, StorageError> {
        Ok(Self {
            inner: Storage::new(StorageConfig::memory(), [INPUT, OUTPUT])?,
            log,
            get_failures: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub async fn seed(&self, key: &str, body: &str) -> Result<(), StorageError> {
        self.inner
            .put_bytes(INPUT, key, Bytes::from(body.to_string()))
            .await
    }

    pub async fn output(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.get_bytes(OUTPUT, key).await
    }

    /// Fail the next `times` gets of `key` with a transport-style error.
    pub fn fail_get(&self, key: &str, times: u32) {
        lock(&self.get_failures).insert(key.to_string(), times);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Stall every get by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Highest number of gets that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn take_get_failure(&self, key: &str) -> bool {
        let mut failures = lock(&self.get_failures);
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ArtifactStore for RecordingStore {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Bytes, StorageError>> {
        Box::pin(async move {
            self.log.push(format!("get:{key}"));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = *lock(&self.delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = if self.take_get_failure(key) {
                Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )))
            } else {
                self.inner.get_bytes(bucket, key).await
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.log.push(format!("put:{key}"));
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "access denied",
                )));
            }
            self.inner.put_bytes(bucket, key, bytes).await
        })
    }
}

/// In-memory broker that records deletes and can fail receives or deletes.
pub struct RecordingBroker {
    pub inner: InMemoryBroker,
    log: CallLog,
    receive_failures: AtomicU32,
    fail_deletes: AtomicBool,
}

impl RecordingBroker {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: InMemoryBroker::new(),
            log,
            receive_failures: AtomicU32::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_receives(&self, times: u32) {
        self.receive_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Receive whatever is visible now, without waiting.
    pub async fn take(&self, max: u32) -> Result<Vec<JobReference>, BrokerError> {
        self.inner
            .receive_batch(ReceiveRequest {
                max_messages: max,
                wait: Duration::ZERO,
                visibility_timeout: Duration::from_secs(30),
            })
            .await
    }
}

impl Broker for RecordingBroker {
    fn receive_batch(
        &self,
        request: ReceiveRequest,
    ) -> BoxFuture<'_, Result<Vec<JobReference>, BrokerError>> {
        Box::pin(async move {
            let failing = self
                .receive_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BrokerError::Transport("queue unreachable".to_string()));
            }
            self.inner.receive_batch(request).await
        })
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptToken) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.log.push(format!("delete:{}", receipt.as_str()));
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(BrokerError::Transport("delete timed out".to_string()));
            }
            self.inner.delete(receipt).await
        })
    }
}

pub struct Harness {
    pub log: CallLog,
    pub store: Arc<RecordingStore>,
    pub broker: Arc<RecordingBroker>,
    pub runner: Arc<JobRunner>,
}

pub fn harness() -> Result<Harness, Box<dyn Error>> {
    let log = CallLog::default();
    let store = Arc::new(RecordingStore::new(log.clone())?);
    let broker = Arc::new(RecordingBroker::new(log.clone()));
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        Arc::new(XmlToJson),
        INPUT,
        OUTPUT,
    ));
    Ok(Harness {
        log,
        store,
        broker,
        runner,
    })
}

/// Short timings so consumer tests finish quickly.
pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 10,
        wait: Duration::from_millis(200),
        visibility_timeout: Duration::from_millis(300),
        poll_backoff: Duration::from_millis(50),
        max_in_flight: 10,
        ack_unretryable: false,
    }
}

/// Wait until an event matching `pred` is broadcast.
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<JobEvent>,
    mut pred: F,
) -> Result<JobEvent, Box<dyn Error>>
where
    F: FnMut(&JobEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}
