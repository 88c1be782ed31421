use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CHUNK_GRANULARITY, DEFAULT_CHUNK_SIZE, DEFAULT_ENDPOINT_TEMPLATE, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE,
};
use crate::error::ProtocolError;
use crate::metadata::validate_metadata_key;

/// Chunk sizes the remote endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min: u64,
    pub max: u64,
    /// Non-final chunks must be a multiple of this (1 = any size).
    pub granularity: u64,
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self {
            min: MIN_CHUNK_SIZE,
            max: MAX_CHUNK_SIZE,
            granularity: CHUNK_GRANULARITY,
        }
    }
}

impl ChunkBounds {
    /// Bounds that accept any non-zero chunk size.
    pub fn unrestricted() -> Self {
        Self {
            min: 1,
            max: u64::MAX,
            granularity: 1,
        }
    }

    /// Checks `size` against these bounds.
    pub fn check(&self, size: u64) -> Result<(), ProtocolError> {
        let reason = if size == 0 {
            Some("must be greater than zero".to_string())
        } else if size < self.min {
            Some(format!("below minimum of {} bytes", self.min))
        } else if size > self.max {
            Some(format!("above maximum of {} bytes", self.max))
        } else if self.granularity > 1 && size % self.granularity != 0 {
            Some(format!("not a multiple of {} bytes", self.granularity))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ProtocolError::InvalidChunkSize { size, reason }),
            None => Ok(()),
        }
    }
}

/// Everything needed to start one upload. Immutable after construction.
#[derive(Clone)]
pub struct UploadTarget {
    endpoint: String,
    account_id: String,
    auth_token: String,
    file_path: PathBuf,
    total_size: u64,
    chunk_size: u64,
    metadata: Vec<(String, String)>,
}

impl UploadTarget {
    /// Starts building a target.
    pub fn builder() -> UploadTargetBuilder {
        UploadTargetBuilder::default()
    }

    /// Creation endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Bearer token sent with every request.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Total upload length in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `Upload-Metadata` pairs, in send order.
    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    /// Number of chunks a clean upload takes.
    pub fn planned_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size)
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("endpoint", &self.endpoint)
            .field("account_id", &self.account_id)
            .field("auth_token", &"<redacted>")
            .field("file_path", &self.file_path)
            .field("total_size", &self.total_size)
            .field("chunk_size", &self.chunk_size)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Builder for [`UploadTarget`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct UploadTargetBuilder {
    endpoint: Option<String>,
    account_id: String,
    auth_token: String,
    file_path: PathBuf,
    total_size: u64,
    chunk_size: Option<u64>,
    bounds: Option<ChunkBounds>,
    metadata: Vec<(String, String)>,
}

impl UploadTargetBuilder {
    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = path.into();
        self
    }

    pub fn total_size(mut self, size: u64) -> Self {
        self.total_size = size;
        self
    }

    /// Chunk size in bytes. Defaults to [`DEFAULT_CHUNK_SIZE`].
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Overrides the endpoint derived from [`DEFAULT_ENDPOINT_TEMPLATE`].
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the accepted chunk-size bounds.
    pub fn chunk_bounds(mut self, bounds: ChunkBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Adds an `Upload-Metadata` pair. A later pair with the same key replaces it.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((key, value)),
        }
        self
    }

    /// Validates and builds the target.
    ///
    /// A `name` metadata entry is added from the file name when absent.
    pub fn build(self) -> Result<UploadTarget, ProtocolError> {
        let account_id = self.account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(ProtocolError::InvalidTarget("account id is empty".into()));
        }
        if self.auth_token.trim().is_empty() {
            return Err(ProtocolError::InvalidTarget("auth token is empty".into()));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(ProtocolError::InvalidTarget("file path is empty".into()));
        }

        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        self.bounds.unwrap_or_default().check(chunk_size)?;

        let endpoint = match self.endpoint {
            Some(e) => e.trim().to_string(),
            None => DEFAULT_ENDPOINT_TEMPLATE.replace("{account_id}", &account_id),
        };
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProtocolError::InvalidTarget(format!(
                "endpoint must be an http(s) URL: {endpoint}"
            )));
        }

        let mut metadata = self.metadata;
        for (key, _) in &metadata {
            validate_metadata_key(key)?;
        }
        if !metadata.iter().any(|(k, _)| k == "name")
            && let Some(name) = self.file_path.file_name()
        {
            metadata.insert(0, ("name".into(), name.to_string_lossy().into_owned()));
        }

        Ok(UploadTarget {
            endpoint,
            account_id,
            auth_token: self.auth_token.trim().to_string(),
            file_path: self.file_path,
            total_size: self.total_size,
            chunk_size,
            metadata,
        })
    }
}

/// A confirmed-offset update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub offset_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressUpdate {
    /// Returns the progress as a percentage (0-100). An empty upload is 100%.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.offset_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Classification of a terminal upload failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Creation,
    Auth,
    ProtocolViolation,
    Io,
    Network,
    RetryExhausted,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creation => "creation failed",
            Self::Auth => "authentication failed",
            Self::ProtocolViolation => "protocol violation",
            Self::Io => "I/O error",
            Self::Network => "network error",
            Self::RetryExhausted => "retries exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure details carried by a terminal [`UploadOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

/// Final report of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
    /// Last server-confirmed offset.
    pub offset_bytes: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
}
