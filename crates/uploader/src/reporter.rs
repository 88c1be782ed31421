//! Progress reporting collaborator.
//!
//! The client calls a [`ProgressReporter`] synchronously after every state
//! change. Implementations must not block; [`ChannelReporter`] forwards
//! events to a display task over an unbounded channel.

use std::time::Duration;

use streamup_protocol::{ProgressUpdate, UploadOutcome};
use tokio::sync::mpsc;

/// A transient failure that is about to be retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// Attempts made so far for the current operation.
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Receives upload progress. Calls must return promptly.
pub trait ProgressReporter: Send + Sync {
    /// The creation handshake succeeded.
    fn session_created(&self, _location: &str, _media_id: Option<&str>) {}

    /// The server confirmed a new offset.
    fn progress(&self, update: ProgressUpdate);

    /// A transient failure will be retried after `notice.delay`.
    fn retrying(&self, _notice: &RetryNotice) {}

    /// The upload reached a terminal state. Called exactly once.
    fn finished(&self, outcome: &UploadOutcome);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn progress(&self, _update: ProgressUpdate) {}

    fn finished(&self, _outcome: &UploadOutcome) {}
}

/// Event emitted by [`ChannelReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    SessionCreated {
        location: String,
        media_id: Option<String>,
    },
    Progress(ProgressUpdate),
    Retrying(RetryNotice),
    Finished(UploadOutcome),
}

/// Forwards reporter calls as [`UploadEvent`]s.
///
/// Sending never blocks. Events sent after the receiver is dropped are
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn session_created(&self, location: &str, media_id: Option<&str>) {
        self.send(UploadEvent::SessionCreated {
            location: location.to_string(),
            media_id: media_id.map(str::to_string),
        });
    }

    fn progress(&self, update: ProgressUpdate) {
        self.send(UploadEvent::Progress(update));
    }

    fn retrying(&self, notice: &RetryNotice) {
        self.send(UploadEvent::Retrying(notice.clone()));
    }

    fn finished(&self, outcome: &UploadOutcome) {
        self.send(UploadEvent::Finished(outcome.clone()));
    }
}
