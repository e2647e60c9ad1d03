use thiserror::Error;

/// Structural errors found while converting a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("malformed XML at byte {position}: {detail}")]
    Malformed { position: u64, detail: String },

    #[error("document has no root element")]
    NoRoot,

    #[error("document has more than one root element (second root <{name}>)")]
    MultipleRoots { name: String },

    #[error("element <{name}> is never closed")]
    Unclosed { name: String },

    #[error("text outside the root element at byte {position}")]
    TextOutsideRoot { position: u64 },

    #[error("json encoding failed: {0}")]
    Encode(String),
}
