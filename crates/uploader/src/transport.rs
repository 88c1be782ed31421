//! Transport seam between the upload state machine and the wire.
//!
//! [`HttpTransport`](crate::HttpTransport) is the production implementation.
//! Keeping the state machine behind a trait lets it run against mock
//! servers that misbehave on demand.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use streamup_transfer::Chunk;

use crate::error::TransportError;

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Result of a successful creation handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedUpload {
    /// Absolute URL of the new upload.
    pub location: String,
    /// Media identifier issued by the hosting service, if any.
    pub media_id: Option<String>,
}

/// Server answer to a chunk transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkResponse {
    /// The server stored data and reports its new offset.
    Accepted { offset: u64 },
    /// The chunk's starting offset did not match the server's (409).
    Conflict,
}

/// Wire operations needed to drive one resumable upload.
pub trait UploadTransport: Send + Sync {
    /// Allocates a new upload of `upload_length` bytes at `endpoint`.
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        upload_length: u64,
        metadata: &'a [(String, String)],
    ) -> TransportFuture<'a, CreatedUpload>;

    /// Sends `chunk` to the upload at `location`.
    fn send_chunk<'a>(
        &'a self,
        location: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkResponse>;

    /// Asks the server how many bytes of the upload it holds.
    fn query_offset<'a>(&'a self, location: &'a str) -> TransportFuture<'a, u64>;
}

impl<T: UploadTransport + ?Sized> UploadTransport for Arc<T> {
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        upload_length: u64,
        metadata: &'a [(String, String)],
    ) -> TransportFuture<'a, CreatedUpload> {
        (**self).create(endpoint, upload_length, metadata)
    }

    fn send_chunk<'a>(
        &'a self,
        location: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkResponse> {
        (**self).send_chunk(location, chunk)
    }

    fn query_offset<'a>(&'a self, location: &'a str) -> TransportFuture<'a, u64> {
        (**self).query_offset(location)
    }
}
