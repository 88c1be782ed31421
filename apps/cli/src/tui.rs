//! Progress display.
//!
//! The display task owns a [`View`] and is the only reader of the upload's
//! event channel. In terminal mode it redraws on every event and on a slow
//! tick; in plain mode it logs instead.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use streamup_protocol::{FailureKind, ProgressUpdate, UploadOutcome};
use streamup_transfer::SpeedCalculator;
use streamup_uploader::{RetryNotice, UploadEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Redraw interval when no events arrive.
const TICK: Duration = Duration::from_millis(250);

/// How long the key listener blocks per poll.
const KEY_POLL: Duration = Duration::from_millis(100);

/// How long the final state stays on screen unless dismissed.
const FINAL_HOLD: Duration = Duration::from_secs(5);

/// Window for rate and ETA estimates.
const SPEED_WINDOW: Duration = Duration::from_secs(60);

const INDENT: &str = "        ";

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// Everything the display shows, built from [`UploadEvent`]s.
pub struct View {
    account_id: String,
    file_name: String,
    offset: u64,
    total: u64,
    created: bool,
    media_id: Option<String>,
    speed: SpeedCalculator,
    retry: Option<RetryNotice>,
    outcome: Option<UploadOutcome>,
}

impl View {
    pub fn new(account_id: impl Into<String>, file_name: impl Into<String>, total: u64) -> Self {
        Self {
            account_id: account_id.into(),
            file_name: file_name.into(),
            offset: 0,
            total,
            created: false,
            media_id: None,
            speed: SpeedCalculator::new(Some(SPEED_WINDOW), None),
            retry: None,
            outcome: None,
        }
    }

    pub fn apply(&mut self, event: &UploadEvent) {
        self.apply_at(event, Instant::now());
    }

    /// Applies `event` as if it arrived at `now`.
    pub fn apply_at(&mut self, event: &UploadEvent, now: Instant) {
        match event {
            UploadEvent::SessionCreated { media_id, .. } => {
                self.created = true;
                self.media_id = media_id.clone();
                self.speed.add_sample_at(0, now);
            }
            UploadEvent::Progress(update) => {
                let delta = update.offset_bytes.saturating_sub(self.offset);
                self.offset = self.offset.max(update.offset_bytes);
                self.total = update.total_bytes;
                self.speed.add_sample_at(delta, now);
                self.retry = None;
            }
            UploadEvent::Retrying(notice) => self.retry = Some(notice.clone()),
            UploadEvent::Finished(outcome) => {
                self.offset = self.offset.max(outcome.offset_bytes);
                if outcome.media_id.is_some() {
                    self.media_id = outcome.media_id.clone();
                }
                self.retry = None;
                self.outcome = Some(outcome.clone());
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&UploadOutcome> {
        self.outcome.as_ref()
    }

    fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            offset_bytes: self.offset,
            total_bytes: self.total,
        }
    }

    fn status(&self) -> String {
        match (&self.outcome, &self.retry) {
            (Some(o), _) if o.completed => "Status: completed".to_string(),
            (Some(o), _) => match &o.error {
                Some(e) if e.kind == FailureKind::Cancelled => "Status: cancelled".to_string(),
                Some(e) => format!("Status: failed ({}): {}", e.kind, e.message),
                None => "Status: failed".to_string(),
            },
            (None, Some(r)) => format!(
                "Status: retrying in {:.1}s (attempt {}/{}): {}",
                r.delay.as_secs_f64(),
                r.attempt + 1,
                r.max_attempts,
                r.reason
            ),
            (None, None) if self.created => "Status: uploading".to_string(),
            (None, None) => "Status: creating upload".to_string(),
        }
    }

    /// Lines to draw on a terminal `width` columns wide.
    pub fn render_lines(&self, width: u16) -> Vec<String> {
        let width = usize::from(width.max(1));
        let progress = self.progress();
        let pct = progress.percentage();

        let rate = self.speed.bytes_per_second();
        let eta = match self.speed.eta(self.total.saturating_sub(self.offset)) {
            _ if self.offset >= self.total => "done".to_string(),
            Some(d) => format_duration(d),
            None => "--".to_string(),
        };

        let mut lines = vec![
            format!("Account ID: {}", self.account_id),
            "~".repeat(width),
            String::new(),
            format!("    ==> File: {}", self.file_name),
            format!("{INDENT}Offset: {} ({})", self.offset, format_bytes(self.offset)),
            format!("{INDENT}Total:  {} ({})", self.total, format_bytes(self.total)),
            format!(
                "{INDENT}{} {pct:.1}%",
                progress_bar(pct, width.saturating_sub(INDENT.len() + 8).min(50))
            ),
            format!(
                "{INDENT}Rate: {}/s   ETA: {eta}",
                format_bytes(rate as u64)
            ),
            String::new(),
            self.status(),
        ];
        if let Some(id) = &self.media_id {
            lines.push(format!("Media ID: {id}"));
        }
        lines.push(String::new());
        lines.push(if self.is_finished() {
            "Finished. Press q to close".to_string()
        } else {
            "Press q or Ctrl-C to cancel".to_string()
        });

        lines
            .into_iter()
            .map(|l| l.chars().take(width).collect())
            .collect()
    }

    /// One-line result printed after the display closes.
    pub fn summary(&self) -> String {
        let Some(outcome) = &self.outcome else {
            return format!("{}: upload did not finish", self.file_name);
        };
        if outcome.completed {
            let media = self
                .media_id
                .as_deref()
                .map(|id| format!(", media id {id}"))
                .unwrap_or_default();
            return format!(
                "uploaded {} ({}){media}",
                self.file_name,
                format_bytes(outcome.total_bytes)
            );
        }
        let reason = outcome
            .error
            .as_ref()
            .map_or_else(|| "unknown error".to_string(), |e| e.message.clone());
        format!(
            "upload of {} stopped at {} of {}: {reason}",
            self.file_name,
            format_bytes(outcome.offset_bytes),
            format_bytes(outcome.total_bytes)
        )
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn progress_bar(pct: f64, width: usize) -> String {
    let width = width.max(10);
    let filled = ((pct.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

// ---------------------------------------------------------------------------
// Terminal mode
// ---------------------------------------------------------------------------

/// Restores the terminal when dropped, including on early return.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// `true` for the keys that cancel the upload.
fn is_cancel_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Polls the keyboard on a blocking thread until `done` is cancelled.
///
/// Raw mode swallows SIGINT, so Ctrl-C arrives here as a key press.
fn spawn_key_listener(
    cancel: CancellationToken,
    done: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !done.is_cancelled() {
            match event::poll(KEY_POLL) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if is_cancel_key(&key) => {
                        if !cancel.is_cancelled() {
                            info!("cancel requested from keyboard");
                            cancel.cancel();
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("keyboard read failed: {e}");
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    warn!("keyboard poll failed: {e}");
                    break;
                }
            }
        }
    })
}

fn draw(out: &mut impl Write, view: &View) -> io::Result<()> {
    let (width, height) = terminal::size()?;
    queue!(out, Clear(ClearType::All))?;
    for (row, line) in view.render_lines(width).iter().enumerate() {
        if row >= usize::from(height) {
            break;
        }
        queue!(out, MoveTo(0, row as u16), Print(line))?;
    }
    out.flush()
}

/// Draws the full-screen display until the upload finishes or the event
/// channel closes. The terminal is restored before returning.
pub async fn run_terminal(
    mut view: View,
    mut events: mpsc::UnboundedReceiver<UploadEvent>,
    cancel: CancellationToken,
) -> io::Result<View> {
    let guard = TerminalGuard::enter()?;
    let done = CancellationToken::new();
    let _stop_keys = done.clone().drop_guard();
    let keys = spawn_key_listener(cancel.clone(), done.clone());

    let mut stdout = io::stdout();
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        draw(&mut stdout, &view)?;
        if view.is_finished() {
            hold_final_screen(&cancel, FINAL_HOLD).await;
            break;
        }
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => view.apply(&event),
                None => break,
            },
            _ = tick.tick() => {}
        }
    }

    done.cancel();
    let _ = keys.await;
    drop(guard);
    Ok(view)
}

/// Waits until `hold` elapses or a cancel key is pressed. Returns at once
/// when the upload was cancelled.
async fn hold_final_screen(cancel: &CancellationToken, hold: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(hold) => {}
    }
}

// ---------------------------------------------------------------------------
// Plain mode
// ---------------------------------------------------------------------------

/// Logs progress until the upload finishes or the event channel closes.
pub async fn run_plain(mut view: View, mut events: mpsc::UnboundedReceiver<UploadEvent>) -> View {
    while let Some(event) = events.recv().await {
        view.apply(&event);
        match &event {
            UploadEvent::SessionCreated { location, media_id } => {
                info!(%location, media_id = ?media_id, file = %view.file_name, "upload started");
            }
            UploadEvent::Progress(update) => {
                info!(
                    offset = update.offset_bytes,
                    total = update.total_bytes,
                    "{:.1}% ({} of {})",
                    update.percentage(),
                    format_bytes(update.offset_bytes),
                    format_bytes(update.total_bytes)
                );
            }
            UploadEvent::Retrying(_) => {}
            UploadEvent::Finished(_) => break,
        }
    }
    view
}
