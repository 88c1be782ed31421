//! Chunked file reading and upload session bookkeeping for resumable uploads.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkReader, checksum_base64};
pub use progress::SpeedCalculator;
pub use types::{Chunk, Confirmation, SessionState, UploadSession};
pub use validation::validate_source_file;

/// Consecutive corrections that confirm no forward progress before the
/// session gives up on the server.
pub const MAX_ZERO_PROGRESS_CORRECTIONS: u32 = 1;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("read offset {offset} is beyond end of input ({size} bytes)")]
    OffsetBeyondEnd { offset: u64, size: u64 },

    #[error("server offset moved backward from {current} to {reported}")]
    OffsetRegressed { current: u64, reported: u64 },

    #[error("server offset {reported} exceeds upload length {total}")]
    OffsetOutOfRange { reported: u64, total: u64 },

    #[error("server repeatedly confirmed no progress at offset {offset}")]
    Stalled { offset: u64 },

    #[error("session is already {0}")]
    SessionClosed(SessionState),
}
