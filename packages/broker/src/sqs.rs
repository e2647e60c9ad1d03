//! AWS SQS broker.

use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use docpipe_core::{JobReference, ReceiptToken};
use futures_util::future::BoxFuture;

use crate::{Broker, BrokerError, ReceiveRequest, whole_seconds};

/// SQS hard limit on messages per receive call.
const SQS_MAX_MESSAGES: u32 = 10;

/// Broker backed by an SQS queue.
#[derive(Clone, Debug)]
pub struct SqsBroker {
    client: Client,
    queue_url: String,
}

impl SqsBroker {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&sdk_config), queue_url)
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<JobReference>, BrokerError> {
        if request.max_messages == 0 {
            return Err(BrokerError::InvalidRequest(
                "max_messages must be at least 1".to_string(),
            ));
        }
        let max = request.max_messages.min(SQS_MAX_MESSAGES);

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max as i32)
            .wait_time_seconds(whole_seconds(request.wait))
            .visibility_timeout(whole_seconds(request.visibility_timeout))
            .send()
            .await
            .map_err(|e| BrokerError::Transport(DisplayErrorContext(&e).to_string()))?;

        let mut batch = Vec::new();
        for message in output.messages.unwrap_or_default() {
            let id = message.message_id.unwrap_or_default();
            let Some(receipt) = message.receipt_handle else {
                tracing::warn!("Skipping message {} without a receipt handle", id);
                continue;
            };
            batch.push(JobReference::new(id, receipt, message.body));
        }
        Ok(batch)
    }

    async fn delete_message(&self, receipt: &ReceiptToken) -> Result<(), BrokerError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt.as_str())
            .send()
            .await
            .map_err(|e| {
                let stale = e
                    .as_service_error()
                    .is_some_and(|se| se.is_receipt_handle_is_invalid());
                if stale {
                    BrokerError::ReceiptNotFound(format!("{receipt:?}"))
                } else {
                    BrokerError::Transport(DisplayErrorContext(&e).to_string())
                }
            })?;
        Ok(())
    }
}

impl Broker for SqsBroker {
    fn receive_batch(
        &self,
        request: ReceiveRequest,
    ) -> BoxFuture<'_, Result<Vec<JobReference>, BrokerError>> {
        Box::pin(self.receive(request))
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptToken) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(self.delete_message(receipt))
    }
}
