use std::fmt;

use bytes::Bytes;

use crate::{MAX_ZERO_PROGRESS_CORRECTIONS, TransferError};

/// A contiguous byte range of the source, read on demand.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset of the first byte within the source.
    pub offset: u64,
    /// Raw chunk data. Clones share the buffer.
    pub data: Bytes,
    /// `true` when the chunk reaches the end of the source.
    pub is_final: bool,
    /// Base64 SHA-256 of `data`, when checksums are enabled.
    pub checksum: Option<String>,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// Lifecycle of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Uploading,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a server-reported offset was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The server confirmed exactly what was sent.
    Advanced { offset: u64 },
    /// The server reported a different offset, which replaced the local one.
    Resynced { expected: u64, offset: u64 },
    /// The server offset equals the current one.
    Unchanged { offset: u64 },
}

impl Confirmation {
    pub fn offset(&self) -> u64 {
        match *self {
            Self::Advanced { offset }
            | Self::Resynced { offset, .. }
            | Self::Unchanged { offset } => offset,
        }
    }
}

/// One negotiated upload.
///
/// `current_offset` only changes through server-reported values and never
/// moves backward. The session completes exactly when it reaches
/// `total_size`.
#[derive(Debug, Clone)]
pub struct UploadSession {
    location: String,
    media_id: Option<String>,
    current_offset: u64,
    total_size: u64,
    state: SessionState,
    zero_progress: u32,
}

impl UploadSession {
    /// Creates a session for an upload the server just allocated.
    ///
    /// An empty upload is complete from the start.
    pub fn new(location: impl Into<String>, total_size: u64, media_id: Option<String>) -> Self {
        let state = if total_size == 0 {
            SessionState::Completed
        } else {
            SessionState::Created
        };
        Self {
            location: location.into(),
            media_id,
            current_offset: 0,
            total_size,
            state,
            zero_progress: 0,
        }
    }

    /// Applies the offset reported in response to a chunk of `sent_len`
    /// bytes sent at `sent_offset`.
    pub fn confirm_chunk(
        &mut self,
        sent_offset: u64,
        sent_len: u64,
        server_offset: u64,
    ) -> Result<Confirmation, TransferError> {
        let expected = sent_offset + sent_len;
        self.adopt(server_offset, Some(expected), sent_len > 0)
    }

    /// Adopts an offset learned from an offset query, e.g. after a transient
    /// failure. Equal offsets are not counted as stalls.
    pub fn resync(&mut self, server_offset: u64) -> Result<Confirmation, TransferError> {
        self.adopt(server_offset, None, false)
    }

    /// Adopts an offset queried after the server rejected a chunk because
    /// of an offset conflict. An unchanged offset counts as a stall.
    pub fn resolve_conflict(&mut self, server_offset: u64) -> Result<Confirmation, TransferError> {
        self.adopt(server_offset, None, true)
    }

    fn adopt(
        &mut self,
        server_offset: u64,
        expected: Option<u64>,
        progress_required: bool,
    ) -> Result<Confirmation, TransferError> {
        if self.state.is_terminal() {
            return Err(TransferError::SessionClosed(self.state));
        }
        if server_offset > self.total_size {
            return Err(TransferError::OffsetOutOfRange {
                reported: server_offset,
                total: self.total_size,
            });
        }
        if server_offset < self.current_offset {
            return Err(TransferError::OffsetRegressed {
                current: self.current_offset,
                reported: server_offset,
            });
        }

        self.state = SessionState::Uploading;

        if server_offset == self.current_offset {
            if progress_required {
                self.zero_progress += 1;
                if self.zero_progress > MAX_ZERO_PROGRESS_CORRECTIONS {
                    return Err(TransferError::Stalled {
                        offset: server_offset,
                    });
                }
            }
            return Ok(Confirmation::Unchanged {
                offset: server_offset,
            });
        }

        let previous = self.current_offset;
        self.zero_progress = 0;
        self.current_offset = server_offset;
        if self.current_offset == self.total_size {
            self.state = SessionState::Completed;
        }

        Ok(match expected {
            Some(e) if e == server_offset => Confirmation::Advanced {
                offset: server_offset,
            },
            Some(e) => Confirmation::Resynced {
                expected: e,
                offset: server_offset,
            },
            None => Confirmation::Resynced {
                expected: previous,
                offset: server_offset,
            },
        })
    }

    /// Marks the session as failed. Completed sessions stay completed.
    pub fn fail(&mut self) {
        if self.state != SessionState::Completed {
            self.state = SessionState::Failed;
        }
    }

    /// Server-issued upload URL.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Media identifier issued alongside the location, if any.
    pub fn media_id(&self) -> Option<&str> {
        self.media_id.as_deref()
    }

    /// Last server-confirmed offset.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_upload_starts_complete() {
        let session = UploadSession::new("https://up/1", 0, None);
        assert!(session.is_complete());
        assert_eq!(session.current_offset(), session.total_size());
    }

    #[test]
    fn exact_confirmation_advances() {
        let mut session = UploadSession::new("https://up/1", 26, Some("m1".into()));
        assert_eq!(session.state(), SessionState::Created);

        let c = session.confirm_chunk(0, 10, 10).unwrap();
        assert_eq!(c, Confirmation::Advanced { offset: 10 });
        assert_eq!(session.state(), SessionState::Uploading);

        session.confirm_chunk(10, 10, 20).unwrap();
        let last = session.confirm_chunk(20, 6, 26).unwrap();
        assert_eq!(last.offset(), 26);
        assert!(session.is_complete());
        assert_eq!(session.media_id(), Some("m1"));
    }

    #[test]
    fn partial_write_resyncs_to_server_value() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        let c = session.confirm_chunk(0, 40, 25).unwrap();
        assert_eq!(
            c,
            Confirmation::Resynced {
                expected: 40,
                offset: 25
            }
        );
        assert_eq!(session.current_offset(), 25);
    }

    #[test]
    fn backward_offset_rejected() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        session.confirm_chunk(0, 50, 50).unwrap();
        let err = session.confirm_chunk(50, 50, 30).unwrap_err();
        assert!(matches!(
            err,
            TransferError::OffsetRegressed {
                current: 50,
                reported: 30
            }
        ));
        assert_eq!(session.current_offset(), 50);
    }

    #[test]
    fn offset_beyond_total_rejected() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        assert!(matches!(
            session.confirm_chunk(0, 50, 101),
            Err(TransferError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn single_zero_progress_correction_allowed() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        let c = session.confirm_chunk(0, 10, 0).unwrap();
        assert_eq!(c, Confirmation::Unchanged { offset: 0 });

        let err = session.confirm_chunk(0, 10, 0).unwrap_err();
        assert!(matches!(err, TransferError::Stalled { offset: 0 }));
    }

    #[test]
    fn progress_resets_stall_counter() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        session.confirm_chunk(0, 10, 0).unwrap();
        session.confirm_chunk(0, 10, 5).unwrap();
        // A fresh stall is tolerated again after progress.
        session.confirm_chunk(5, 10, 5).unwrap();
        assert_eq!(session.current_offset(), 5);
    }

    #[test]
    fn resync_with_same_offset_is_not_a_stall() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        for _ in 0..5 {
            assert_eq!(
                session.resync(0).unwrap(),
                Confirmation::Unchanged { offset: 0 }
            );
        }
        assert!(session.resync(30).is_ok());
        assert_eq!(session.current_offset(), 30);
    }

    #[test]
    fn conflict_with_same_offset_counts_as_stall() {
        let mut session = UploadSession::new("https://up/1", 100, None);
        session.resolve_conflict(0).unwrap();
        assert!(session.resolve_conflict(0).is_err());
    }

    #[test]
    fn terminal_session_rejects_updates() {
        let mut session = UploadSession::new("https://up/1", 10, None);
        session.confirm_chunk(0, 10, 10).unwrap();
        assert!(matches!(
            session.resync(10),
            Err(TransferError::SessionClosed(SessionState::Completed))
        ));

        let mut failed = UploadSession::new("https://up/2", 10, None);
        failed.fail();
        assert_eq!(failed.state(), SessionState::Failed);
        assert!(failed.confirm_chunk(0, 10, 10).is_err());
    }

    #[test]
    fn chunk_end() {
        let chunk = Chunk {
            offset: 10,
            data: Bytes::from(vec![0; 5]),
            is_final: false,
            checksum: None,
        };
        assert_eq!(chunk.end(), 15);
        assert_eq!(chunk.len(), 5);
    }
}
