//! Job reference types for work items delivered by the broker.

use serde::{Deserialize, Serialize};

/// Broker-assigned identifier of a message, used for logging and correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token that authorizes deleting one particular delivery of a message.
///
/// Every delivery gets a fresh token; a token from an earlier delivery may be
/// rejected by the broker once the message has been redelivered.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptToken(pub String);

impl ReceiptToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Receipt handles are long opaque blobs; keep logs readable.
impl std::fmt::Debug for ReceiptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short: String = self.0.chars().take(12).collect();
        if short.len() < self.0.len() {
            write!(f, "ReceiptToken({short}…)")
        } else {
            write!(f, "ReceiptToken({short})")
        }
    }
}

/// One delivered, not-yet-acknowledged unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReference {
    /// Identifier for logging/correlation.
    pub message_id: MessageId,
    /// Authorizes deletion of this delivery.
    pub receipt: ReceiptToken,
    /// Storage key of the input artifact, as sent by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl JobReference {
    pub fn new(
        message_id: impl Into<String>,
        receipt: impl Into<String>,
        payload: Option<String>,
    ) -> Self {
        Self {
            message_id: MessageId::new(message_id),
            receipt: ReceiptToken::new(receipt),
            payload,
        }
    }

    /// The input storage key, or `None` when the payload is missing or blank.
    ///
    /// A non-blank payload is returned verbatim; object keys may carry
    /// leading or trailing spaces.
    pub fn input_key(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }
}
