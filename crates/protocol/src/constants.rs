/// tus protocol version sent with every request.
pub const TUS_VERSION: &str = "1.0.0";

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Default upload endpoint. `{account_id}` is substituted at target construction.
pub const DEFAULT_ENDPOINT_TEMPLATE: &str =
    "https://api.cloudflare.com/client/v4/accounts/{account_id}/stream";

/// Smallest chunk the hosting service accepts (except the final chunk).
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// Largest chunk the hosting service accepts.
pub const MAX_CHUNK_SIZE: u64 = 200 * MIB;

/// Non-final chunks must be a multiple of this many bytes.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * MIB;

/// Content type of a `PATCH` body.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Header names used by the tus core protocol and its extensions.
pub mod headers {
    pub const TUS_RESUMABLE: &str = "Tus-Resumable";
    pub const UPLOAD_LENGTH: &str = "Upload-Length";
    pub const UPLOAD_OFFSET: &str = "Upload-Offset";
    pub const UPLOAD_METADATA: &str = "Upload-Metadata";
    pub const UPLOAD_CHECKSUM: &str = "Upload-Checksum";
    pub const LOCATION: &str = "Location";
    /// Media identifier issued by the hosting service on creation.
    pub const STREAM_MEDIA_ID: &str = "stream-media-id";
}
