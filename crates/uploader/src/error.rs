//! Upload error types.

use streamup_protocol::{FailureInfo, FailureKind, ProtocolError};
use streamup_transfer::TransferError;

/// Errors returned by an [`UploadTransport`](crate::UploadTransport).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing {0} header in response")]
    MissingHeader(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid request: {0}")]
    Request(String),
}

impl TransportError {
    /// `true` for failures worth retrying: connection problems, timeouts,
    /// 408, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// `true` when the server rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Request(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Terminal upload failures.
///
/// Transient errors never appear here directly: they are retried and only
/// surface as [`UploadError::RetryExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload creation failed: {message}")]
    Creation { status: Option<u16>, message: String },

    #[error("authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reserved for the failure taxonomy. The client never returns it:
    /// network failures are retried and end as `RetryExhausted`.
    #[error("network error: {0}")]
    Network(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Creation { .. } => FailureKind::Creation,
            Self::Auth { .. } => FailureKind::Auth,
            Self::ProtocolViolation(_) => FailureKind::ProtocolViolation,
            Self::Io(_) => FailureKind::Io,
            Self::Network(_) => FailureKind::Network,
            Self::RetryExhausted { .. } => FailureKind::RetryExhausted,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Converts into the wire-level failure description.
    pub fn to_failure(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Builds an [`UploadError::Auth`] from a 401/403 transport error.
    pub(crate) fn auth(e: &TransportError) -> Self {
        match e {
            TransportError::Status { status, body } => Self::Auth {
                status: *status,
                message: body.clone(),
            },
            other => Self::Auth {
                status: 0,
                message: other.to_string(),
            },
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(io) => Self::Io(io),
            TransferError::InvalidSource(msg) => {
                Self::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))
            }
            e @ TransferError::OffsetBeyondEnd { .. } => Self::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                e.to_string(),
            )),
            e @ (TransferError::OffsetRegressed { .. }
            | TransferError::OffsetOutOfRange { .. }
            | TransferError::Stalled { .. }
            | TransferError::SessionClosed(_)) => Self::ProtocolViolation(e.to_string()),
        }
    }
}

/// `true` for local I/O errors that may succeed when retried.
pub(crate) fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}
