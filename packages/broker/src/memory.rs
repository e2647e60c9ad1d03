//! In-process broker with SQS-like visibility semantics.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use docpipe_core::{JobReference, MessageId, ReceiptToken};
use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;
use ulid::Ulid;

use crate::{Broker, BrokerError, ReceiveRequest};

struct StoredMessage {
    id: MessageId,
    body: Option<String>,
    /// Receipt of the current delivery, if the message was ever delivered.
    receipt: Option<ReceiptToken>,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Default)]
struct Inner {
    messages: VecDeque<StoredMessage>,
    deleted: u64,
}

/// A broker that lives in memory.
///
/// Delivered messages are hidden for the request's visibility timeout and
/// become receivable again if not deleted in time. Each delivery carries a
/// fresh receipt; receipts from earlier deliveries are rejected.
#[derive(Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a message whose body is `body`.
    pub fn send(&self, body: impl Into<String>) -> MessageId {
        self.send_raw(Some(body.into()))
    }

    /// Enqueue a message, possibly without a body.
    pub fn send_raw(&self, body: Option<String>) -> MessageId {
        let id = MessageId::new(Ulid::new().to_string());
        self.lock().messages.push_back(StoredMessage {
            id: id.clone(),
            body,
            receipt: None,
            visible_at: Instant::now(),
            receive_count: 0,
        });
        self.notify.notify_waiters();
        id
    }

    /// Messages not yet deleted, visible or not.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by a visibility timeout.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .messages
            .iter()
            .filter(|m| m.visible_at > now)
            .count()
    }

    /// Total successful deletes.
    pub fn deleted(&self) -> u64 {
        self.lock().deleted
    }

    /// How many times a message has been delivered, if it still exists.
    pub fn receive_count(&self, id: &MessageId) -> Option<u32> {
        self.lock()
            .messages
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.receive_count)
    }

    /// Deliver whatever is visible right now, up to `request.max_messages`.
    fn take_visible(&self, request: &ReceiveRequest) -> Vec<JobReference> {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut batch = Vec::new();
        for message in inner.messages.iter_mut() {
            if batch.len() as u32 >= request.max_messages {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            let receipt = ReceiptToken::new(Ulid::new().to_string());
            message.receipt = Some(receipt.clone());
            message.visible_at = now + request.visibility_timeout;
            message.receive_count += 1;
            batch.push(JobReference {
                message_id: message.id.clone(),
                receipt,
                payload: message.body.clone(),
            });
        }
        batch
    }

    /// Earliest moment a hidden message becomes visible again.
    fn next_visible_at(&self) -> Option<Instant> {
        self.lock().messages.iter().map(|m| m.visible_at).min()
    }

    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<JobReference>, BrokerError> {
        if request.max_messages == 0 {
            return Err(BrokerError::InvalidRequest(
                "max_messages must be at least 1".to_string(),
            ));
        }

        let deadline = Instant::now() + request.wait;
        loop {
            // Registered before checking so a send in between is not missed.
            let notified = self.notify.notified();

            let batch = self.take_visible(&request);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake = match self.next_visible_at() {
                Some(at) if at < deadline => at,
                _ => deadline,
            };
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn remove(&self, receipt: &ReceiptToken) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let position = inner
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt));
        match position {
            Some(index) => {
                inner.messages.remove(index);
                inner.deleted += 1;
                Ok(())
            }
            None => Err(BrokerError::ReceiptNotFound(format!("{receipt:?}"))),
        }
    }
}

impl Broker for InMemoryBroker {
    fn receive_batch(
        &self,
        request: ReceiveRequest,
    ) -> BoxFuture<'_, Result<Vec<JobReference>, BrokerError>> {
        Box::pin(self.receive(request))
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptToken) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move { self.remove(receipt) })
    }
}
