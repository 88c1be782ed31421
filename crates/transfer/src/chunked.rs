use std::io::SeekFrom;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::TransferError;
use crate::types::Chunk;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the base64-encoded digest, the
/// encoding the `Upload-Checksum` header expects.
pub fn checksum_base64(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads chunks of a seekable source at arbitrary offsets.
///
/// Every read seeks first, so calls may arrive out of order (for example
/// after the server corrects the offset). The reader owns the source; dropping
/// it releases the file handle.
pub struct ChunkReader<R = tokio::fs::File> {
    source: R,
    size: u64,
    checksums: bool,
}

impl ChunkReader<tokio::fs::File> {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(file, size))
    }
}

impl<R> ChunkReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    /// Wraps `source`, which holds `size` bytes.
    pub fn new(source: R, size: u64) -> Self {
        Self {
            source,
            size,
            checksums: false,
        }
    }

    /// Attaches a SHA-256 checksum to every chunk read.
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    /// Reads up to `max_len` bytes starting at `offset`.
    ///
    /// Returns `None` when `offset` is exactly the end of input. The chunk is
    /// shorter than `max_len` only when it reaches the end of input.
    pub async fn read(&mut self, offset: u64, max_len: u64) -> Result<Option<Chunk>, TransferError> {
        if offset > self.size {
            return Err(TransferError::OffsetBeyondEnd {
                offset,
                size: self.size,
            });
        }
        let want = max_len.min(self.size - offset);
        if want == 0 {
            return Ok(None);
        }

        self.source.seek(SeekFrom::Start(offset)).await?;
        let mut data = Vec::with_capacity(want as usize);
        (&mut self.source).take(want).read_to_end(&mut data).await?;
        if data.is_empty() {
            return Ok(None);
        }

        let checksum = self.checksums.then(|| checksum_base64(&data));
        let is_final = offset + data.len() as u64 >= self.size;
        Ok(Some(Chunk {
            offset,
            data: Bytes::from(data),
            is_final,
            checksum,
        }))
    }

    /// Total source size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
