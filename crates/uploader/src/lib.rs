//! Resumable chunked upload client.
//!
//! Drives a tus 1.0.0 endpoint from creation to completion:
//!
//! 1. **Create**: `POST` the upload length and metadata, receive a location
//! 2. **Upload**: `PATCH` one chunk at a time at the server-confirmed offset
//! 3. **Reconcile**: adopt the server's offset after partial writes,
//!    conflicts and transient failures
//!
//! The wire is abstracted behind [`UploadTransport`] so the state machine in
//! [`UploadClient`] can be exercised against in-memory servers.

pub mod client;
pub mod error;
pub mod http;
pub mod reporter;
pub mod retry;
pub mod transport;

// Re-export primary types for convenience.
pub use client::{UploadClient, UploadReport};
pub use error::{TransportError, UploadError};
pub use http::{HttpOptions, HttpTransport};
pub use reporter::{ChannelReporter, NoopReporter, ProgressReporter, RetryNotice, UploadEvent};
pub use retry::RetryPolicy;
pub use transport::{ChunkResponse, CreatedUpload, TransportFuture, UploadTransport};

use std::time::Duration;

/// Timeout for a single HTTP request, including a full chunk body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
