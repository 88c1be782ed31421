//! Upload orchestrator: wires the client, the display and cancellation.

use std::sync::Arc;

use anyhow::Context;
use streamup_protocol::UploadOutcome;
use streamup_transfer::ChunkReader;
use streamup_uploader::{ChannelReporter, HttpTransport, UploadClient};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::tui::{self, View};

/// Result of one run, after the display has closed.
pub struct Finished {
    pub outcome: UploadOutcome,
    pub summary: String,
}

/// Uploads the configured file, showing progress on the terminal display
/// when `tui` is set and in the log otherwise.
pub async fn run(settings: Settings, tui: bool) -> anyhow::Result<Finished> {
    let cancel = CancellationToken::new();
    let target = settings.target;

    // -- Client --
    let transport = HttpTransport::new(target.auth_token(), &settings.http)
        .context("failed to build HTTP client")?;
    let (reporter, events) = ChannelReporter::new();
    let client = UploadClient::new(transport, settings.retry).with_reporter(Arc::new(reporter));

    let reader = ChunkReader::open(target.file_path())
        .await
        .with_context(|| format!("failed to open {}", target.file_path().display()))?
        .with_checksums(settings.checksum);

    // -- Display --
    let file_name = target
        .file_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.file_path().display().to_string());
    let view = View::new(target.account_id(), file_name, target.total_size());

    let display = if tui {
        tokio::spawn(tui::run_terminal(view, events, cancel.clone()))
    } else {
        tokio::spawn(async move { Ok::<_, std::io::Error>(tui::run_plain(view, events).await) })
    };

    // Raw mode turns Ctrl-C into a key press; this covers plain mode.
    let sigint = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("SIGINT received, cancelling upload");
                cancel.cancel();
            }
        })
    };

    tracing::info!(
        file = %target.file_path().display(),
        bytes = target.total_size(),
        chunk_size = target.chunk_size(),
        chunks = target.planned_chunks(),
        "starting upload"
    );
    let result = client.upload(&target, reader, &cancel).await;

    // Dropping the client closes the event channel.
    drop(client);
    sigint.abort();

    let view = display
        .await
        .context("display task panicked")?
        .context("terminal display failed")?;

    let outcome = match view.outcome() {
        Some(outcome) => outcome.clone(),
        None => UploadOutcome {
            completed: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_failure()),
            offset_bytes: 0,
            total_bytes: target.total_size(),
            media_id: result.as_ref().ok().and_then(|r| r.media_id.clone()),
        },
    };

    Ok(Finished {
        summary: view.summary(),
        outcome,
    })
}
