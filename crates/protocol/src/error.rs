//! Protocol-level error types.

/// Errors produced while building targets or encoding/decoding tus headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid upload target: {0}")]
    InvalidTarget(String),

    #[error("invalid chunk size {size} bytes: {reason}")]
    InvalidChunkSize { size: u64, reason: String },

    #[error("invalid metadata key: {0:?}")]
    InvalidMetadataKey(String),

    #[error("invalid {header} header: {value:?}")]
    InvalidHeader { header: &'static str, value: String },
}
