/// Broker client errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached or rejected the call.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// The receipt token does not match a current delivery.
    #[error("receipt not found or expired: {0}")]
    ReceiptNotFound(String),

    #[error("invalid broker request: {0}")]
    InvalidRequest(String),
}
