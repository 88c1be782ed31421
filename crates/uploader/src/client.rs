//! Upload state machine.
//!
//! [`UploadClient`] negotiates a session, then sends one chunk per step at
//! the server-confirmed offset until the server holds every byte. Transient
//! failures are retried with backoff and followed by an offset query, so
//! the next chunk always starts where the server says it should.

use std::sync::Arc;

use streamup_protocol::{ProgressUpdate, UploadOutcome, UploadTarget};
use streamup_transfer::{ChunkReader, Confirmation, TransferError, UploadSession};
use tokio::io::{AsyncRead, AsyncSeek};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TransportError, UploadError, is_transient_io};
use crate::reporter::{NoopReporter, ProgressReporter, RetryNotice};
use crate::retry::RetryPolicy;
use crate::transport::{ChunkResponse, UploadTransport};

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub location: String,
    pub media_id: Option<String>,
    pub total_bytes: u64,
    /// Steps that moved the server offset forward.
    pub chunks_sent: u64,
}

/// Drives resumable uploads over an [`UploadTransport`].
pub struct UploadClient<T> {
    transport: T,
    policy: RetryPolicy,
    reporter: Arc<dyn ProgressReporter>,
}

impl<T: UploadTransport> UploadClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Sends progress to `reporter` instead of discarding it.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Uploads the whole source described by `target`.
    ///
    /// The reader is dropped before the reporter hears the final outcome,
    /// which it hears exactly once whatever happens.
    pub async fn upload<R>(
        &self,
        target: &UploadTarget,
        reader: ChunkReader<R>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut reader = reader;
        let mut session = None;
        let result = self.drive(target, &mut reader, &mut session, cancel).await;
        drop(reader);

        if result.is_err()
            && let Some(s) = session.as_mut()
        {
            s.fail();
        }

        let outcome = UploadOutcome {
            completed: result.is_ok(),
            error: result.as_ref().err().map(UploadError::to_failure),
            offset_bytes: session.as_ref().map_or(0, UploadSession::current_offset),
            total_bytes: target.total_size(),
            media_id: session
                .as_ref()
                .and_then(|s| s.media_id().map(str::to_string)),
        };
        match &result {
            Ok(report) => info!(
                location = %report.location,
                bytes = report.total_bytes,
                chunks = report.chunks_sent,
                "upload complete"
            ),
            Err(e) => warn!(kind = %e.kind(), offset = outcome.offset_bytes, "upload failed: {e}"),
        }
        self.reporter.finished(&outcome);

        result
    }

    async fn drive<R>(
        &self,
        target: &UploadTarget,
        reader: &mut ChunkReader<R>,
        session: &mut Option<UploadSession>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        if reader.size() != target.total_size() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "source is {} bytes, expected {}",
                    reader.size(),
                    target.total_size()
                ),
            )));
        }

        let session = session.insert(self.create_session(target, cancel).await?);
        let mut chunks_sent = 0u64;
        while !session.is_complete() {
            self.upload_chunk(session, reader, target.chunk_size(), cancel)
                .await?;
            chunks_sent += 1;
        }

        Ok(UploadReport {
            location: session.location().to_string(),
            media_id: session.media_id().map(str::to_string),
            total_bytes: session.total_size(),
            chunks_sent,
        })
    }

    /// Performs the creation handshake, retrying transient failures.
    pub async fn create_session(
        &self,
        target: &UploadTarget,
        cancel: &CancellationToken,
    ) -> Result<UploadSession, UploadError> {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                r = self.transport.create(target.endpoint(), target.total_size(), target.metadata()) => r,
            };

            match result {
                Ok(created) => {
                    info!(
                        location = %created.location,
                        media_id = ?created.media_id,
                        total = target.total_size(),
                        "upload session created"
                    );
                    self.reporter
                        .session_created(&created.location, created.media_id.as_deref());
                    return Ok(UploadSession::new(
                        created.location,
                        target.total_size(),
                        created.media_id,
                    ));
                }
                Err(e) if e.is_auth() => return Err(UploadError::auth(&e)),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.backoff(failures, e.to_string(), cancel).await?;
                }
                Err(e) => {
                    return Err(UploadError::Creation {
                        status: e.status(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Advances `session` by one step.
    ///
    /// Reads the chunk at the current offset, sends it and adopts the offset
    /// the server reports. Returns once the offset has moved forward;
    /// transient failures and zero-progress answers are handled internally.
    pub async fn upload_chunk<R>(
        &self,
        session: &mut UploadSession,
        reader: &mut ChunkReader<R>,
        chunk_size: u64,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            if session.is_complete() {
                return Ok(Confirmation::Unchanged {
                    offset: session.current_offset(),
                });
            }

            let offset = session.current_offset();
            let chunk = match reader.read(offset, chunk_size).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    return Err(UploadError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("source ended at {offset} of {} bytes", session.total_size()),
                    )));
                }
                Err(TransferError::Io(e)) if is_transient_io(&e) => {
                    failures += 1;
                    self.backoff(failures, format!("read failed: {e}"), cancel)
                        .await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            debug!(offset, len = chunk.len(), is_final = chunk.is_final, "sending chunk");
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                r = self.transport.send_chunk(session.location(), &chunk) => r,
            };

            match sent {
                Ok(ChunkResponse::Accepted { offset: server }) => {
                    let confirmation = session.confirm_chunk(chunk.offset, chunk.len(), server)?;
                    if let Some(c) = self.advanced(session, confirmation) {
                        return Ok(c);
                    }
                }
                Ok(ChunkResponse::Conflict) => {
                    warn!(offset, "offset conflict, querying server offset");
                    let server = match self.query(session.location(), cancel).await {
                        Ok(server) => server,
                        Err(_) if cancel.is_cancelled() => return Err(UploadError::Cancelled),
                        Err(e) if e.is_auth() => return Err(UploadError::auth(&e)),
                        Err(e) if e.is_transient() => {
                            failures += 1;
                            self.backoff(failures, e.to_string(), cancel).await?;
                            continue;
                        }
                        Err(e) => {
                            return Err(UploadError::ProtocolViolation(format!(
                                "offset query after conflict failed: {e}"
                            )));
                        }
                    };
                    let confirmation = session.resolve_conflict(server)?;
                    if let Some(c) = self.advanced(session, confirmation) {
                        return Ok(c);
                    }
                }
                Err(e) if e.is_auth() => return Err(UploadError::auth(&e)),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.backoff(failures, e.to_string(), cancel).await?;
                    if let Some(c) = self.reconcile(session, cancel).await? {
                        return Ok(c);
                    }
                }
                Err(e) => {
                    return Err(UploadError::ProtocolViolation(format!(
                        "chunk at offset {offset} rejected: {e}"
                    )));
                }
            }
        }
    }

    /// Reports progress when `confirmation` moved the offset.
    fn advanced(
        &self,
        session: &UploadSession,
        confirmation: Confirmation,
    ) -> Option<Confirmation> {
        match confirmation {
            Confirmation::Unchanged { offset } => {
                warn!(offset, "server made no progress, resending");
                None
            }
            Confirmation::Resynced { expected, offset } => {
                debug!(expected, offset, "adopted server offset");
                self.report_progress(session);
                Some(confirmation)
            }
            Confirmation::Advanced { .. } => {
                self.report_progress(session);
                Some(confirmation)
            }
        }
    }

    /// Adopts the server offset after a transient failure.
    ///
    /// A query that fails transiently is not fatal: the next send at the old
    /// offset gets a conflict or a fresh offset anyway.
    async fn reconcile(
        &self,
        session: &mut UploadSession,
        cancel: &CancellationToken,
    ) -> Result<Option<Confirmation>, UploadError> {
        match self.query(session.location(), cancel).await {
            Ok(server) => {
                let confirmation = session.resync(server)?;
                Ok(self.advanced_quiet(session, confirmation))
            }
            Err(_) if cancel.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) if e.is_auth() => Err(UploadError::auth(&e)),
            Err(e) if e.is_transient() => {
                warn!("offset query failed, resending at {}: {e}", session.current_offset());
                Ok(None)
            }
            Err(e) => Err(UploadError::ProtocolViolation(format!(
                "offset query after failed chunk: {e}"
            ))),
        }
    }

    fn advanced_quiet(
        &self,
        session: &UploadSession,
        confirmation: Confirmation,
    ) -> Option<Confirmation> {
        match confirmation {
            Confirmation::Unchanged { .. } => None,
            other => {
                debug!(offset = other.offset(), "server kept part of the failed chunk");
                self.report_progress(session);
                Some(other)
            }
        }
    }

    async fn query(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Request("cancelled".into())),
            r = self.transport.query_offset(location) => r,
        }
    }

    /// Waits before retry number `failures`, or gives up when the policy is
    /// exhausted.
    async fn backoff(
        &self,
        failures: u32,
        reason: String,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        if !self.policy.allows_retry(failures) {
            return Err(UploadError::RetryExhausted {
                attempts: failures,
                last_error: reason,
            });
        }

        let delay = self.policy.delay_for_attempt(failures);
        warn!(
            attempt = failures,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying: {reason}"
        );
        self.reporter.retrying(&RetryNotice {
            attempt: failures,
            max_attempts: self.policy.max_attempts,
            delay,
            reason,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn report_progress(&self, session: &UploadSession) {
        self.reporter.progress(ProgressUpdate {
            offset_bytes: session.current_offset(),
            total_bytes: session.total_size(),
        });
    }
}
