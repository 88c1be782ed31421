//! Wire constants and shared types for tus resumable uploads.

pub mod constants;
pub mod error;
pub mod metadata;
pub mod types;

// Re-export primary types for convenience.
pub use error::ProtocolError;
pub use metadata::{encode_metadata, parse_offset};
pub use types::{
    ChunkBounds, FailureInfo, FailureKind, ProgressUpdate, UploadOutcome, UploadTarget,
    UploadTargetBuilder,
};
