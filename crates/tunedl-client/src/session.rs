//! Download session state machine.
//!
//! Owns exactly one logical job at a time: acceptance of start/stop/retry,
//! interpretation of the event stream, and the stream connection's lifetime.
//! A terminal event closes the connection; a fresh start opens a new one.
//! No globals — a `Session` is an owned value, so tests (or a future
//! multi-pane UI) can run several side by side.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};
use tunedl_proto::protocol::{RetryRequest, StartRequest, StreamEvent};

use crate::sink::{MessageSink, Severity};
use crate::stream::StreamHandle;

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Start or retry command sent; waiting for the server's reply.
    Starting,
    Running,
    /// Stop requested; the authoritative end still arrives via the stream.
    Stopping,
    Succeeded,
    Stopped,
    Failed,
}

impl Phase {
    /// A job is live in these phases: the form stays locked, no new start is
    /// accepted, and a stream connection may exist.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Starting | Phase::Running | Phase::Stopping)
    }

    /// Phases from which no further events for the current job are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Stopped | Phase::Failed)
    }
}

/// Latest progress for display.  Only the most recent value matters; nothing
/// decides on progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    /// Always within 0..=100, whatever the wire said.
    pub percent: u8,
    pub status_text: String,
}

impl Default for ProgressView {
    fn default() -> Self {
        Self {
            percent: 0,
            status_text: "ready".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a job is already running")]
    JobActive,
    #[error("no job is running")]
    NotRunning,
    #[error("nothing to retry")]
    NothingToRetry,
}

pub struct Session {
    phase: Phase,
    /// Phase to fall back to when a start/retry command is refused.
    prior_phase: Phase,
    /// Failed-items flag to restore alongside `prior_phase`.
    prior_failed: bool,
    progress: ProgressView,
    has_failed_items: bool,
    last_server_directory: Option<PathBuf>,
    stream: Option<StreamHandle>,
    last_request: Option<StartRequest>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            prior_phase: Phase::Idle,
            prior_failed: false,
            progress: ProgressView::default(),
            has_failed_items: false,
            last_server_directory: None,
            stream: None,
            last_request: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> &ProgressView {
        &self.progress
    }

    pub fn has_failed_items(&self) -> bool {
        self.has_failed_items
    }

    /// Directory the last job announced it was saving into.  Seeds the
    /// playlist catalog's default search path.
    pub fn last_server_directory(&self) -> Option<&Path> {
        self.last_server_directory.as_deref()
    }

    pub fn stream_open(&self) -> bool {
        self.stream.is_some()
    }

    // ── commands ──────────────────────────────────────────────────────────────

    /// Accept a fresh start.  Rejected while a job is live — exactly one job
    /// may run at a time.
    pub fn begin_start(&mut self, request: StartRequest) -> Result<(), SessionError> {
        if self.phase.is_active() {
            return Err(SessionError::JobActive);
        }
        self.prior_phase = self.phase;
        self.prior_failed = self.has_failed_items;
        self.phase = Phase::Starting;
        self.progress = ProgressView::default();
        self.has_failed_items = false;
        self.last_request = Some(request);
        Ok(())
    }

    /// Accept a retry of the failed subset.  Only valid from a terminal phase
    /// with failed items on record; the UI is expected to guard this, so a
    /// rejection here is surfaced as a plain hint rather than anything fatal.
    pub fn begin_retry(&mut self) -> Result<RetryRequest, SessionError> {
        if self.phase.is_active() {
            return Err(SessionError::JobActive);
        }
        if !self.phase.is_terminal() || !self.has_failed_items {
            return Err(SessionError::NothingToRetry);
        }
        let request = self
            .last_request
            .as_ref()
            .ok_or(SessionError::NothingToRetry)?
            .retry_request();
        self.prior_phase = self.phase;
        self.prior_failed = self.has_failed_items;
        self.phase = Phase::Starting;
        self.progress = ProgressView::default();
        self.has_failed_items = false;
        Ok(request)
    }

    /// The start/retry command was accepted by the server: the job is live
    /// and `stream` is its event feed.  Any previous connection is closed
    /// first so at most one is ever open.
    pub fn command_succeeded(&mut self, stream: StreamHandle) {
        if self.phase != Phase::Starting {
            warn!(phase = ?self.phase, "command_succeeded outside of Starting; ignoring");
            return;
        }
        if let Some(old) = self.stream.take() {
            old.close();
        }
        info!(conn_id = stream.conn_id(), "job accepted; stream open");
        self.stream = Some(stream);
        self.phase = Phase::Running;
    }

    /// The start/retry command failed (transport error or refused by the
    /// server).  The session falls back to where it was.
    pub fn command_failed(&mut self) {
        if self.phase != Phase::Starting {
            return;
        }
        self.phase = self.prior_phase;
        self.has_failed_items = self.prior_failed;
    }

    /// Request a stop.  Transitions to `Stopping` immediately — the stop
    /// command's own reply is not authoritative, the stream's terminal event
    /// is.  A failed stop command therefore never reverts the phase.
    pub fn request_stop(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Running {
            return Err(SessionError::NotRunning);
        }
        self.phase = Phase::Stopping;
        self.progress.status_text = "stopping...".to_string();
        Ok(())
    }

    /// Drop the session's job without claiming any outcome, closing the
    /// stream if one is open.  Used when the embedding surface goes away.
    pub fn abandon(&mut self) {
        self.close_stream();
        self.phase = Phase::Idle;
    }

    // ── stream interpretation ─────────────────────────────────────────────────

    /// Apply one event from the stream, in arrival order.
    ///
    /// Events outside an active job, or from a connection other than the
    /// live one, are stale and must not mutate anything.
    pub fn apply_event(&mut self, conn_id: u64, event: StreamEvent, sink: &mut MessageSink) {
        if !self.phase.is_active() {
            debug!(conn_id, "dropping stream event outside an active job");
            return;
        }
        match self.stream.as_ref() {
            Some(live) if live.conn_id() == conn_id => {}
            _ => {
                debug!(conn_id, "dropping event from a superseded connection");
                return;
            }
        }

        if let Some(dir) = event.saved_directory() {
            debug!(dir = %dir.display(), "job announced its save directory");
            self.last_server_directory = Some(dir);
        }

        match event {
            StreamEvent::Log { message, .. } => sink.log(Severity::Info, message),
            StreamEvent::Progress {
                progress,
                status_text,
            } => {
                self.progress.percent = progress.clamp(0.0, 100.0).round() as u8;
                self.progress.status_text = status_text;
            }
            StreamEvent::Done {
                message,
                has_failed,
                ..
            } => self.finish(Phase::Succeeded, message, has_failed, sink),
            StreamEvent::Stopped {
                message,
                has_failed,
                ..
            } => self.finish(Phase::Stopped, message, has_failed, sink),
            StreamEvent::Error {
                message,
                has_failed,
            } => {
                sink.log(Severity::Error, message.clone());
                sink.notify(Severity::Error, "job failed", message);
                self.progress.status_text = "failed".to_string();
                self.has_failed_items = has_failed;
                self.phase = Phase::Failed;
                self.close_stream();
                error!("job reached Failed");
            }
        }
    }

    /// The transport dropped without a terminal event.  Distinct from both a
    /// clean end and a job-reported error: the job's true outcome is unknown,
    /// so the session only stops treating it as live.
    pub fn stream_disconnected(&mut self, conn_id: u64, sink: &mut MessageSink) {
        match self.stream.as_ref() {
            Some(live) if live.conn_id() == conn_id => {}
            // A terminal event already closed this run's stream, or the
            // close belongs to a superseded connection.
            _ => return,
        }
        if !matches!(self.phase, Phase::Running | Phase::Stopping) {
            return;
        }
        error!("stream connection lost while a job was active");
        sink.log(
            Severity::Error,
            "connection to the server was lost; check that the backend is running",
        );
        sink.notify(
            Severity::Error,
            "connection lost",
            "the event stream dropped before the job finished",
        );
        self.close_stream();
        self.progress.status_text = "disconnected".to_string();
        self.phase = Phase::Idle;
    }

    fn finish(&mut self, phase: Phase, message: String, has_failed: bool, sink: &mut MessageSink) {
        let (log_severity, label, title) = if phase == Phase::Succeeded {
            (Severity::Success, "finished", "job finished")
        } else {
            (Severity::Info, "stopped", "job stopped")
        };
        sink.log(log_severity, message.clone());
        let severity = if has_failed {
            Severity::Warning
        } else {
            Severity::Success
        };
        sink.notify(severity, title, message);
        self.progress.status_text = label.to_string();
        self.has_failed_items = has_failed;
        self.phase = phase;
        self.close_stream();
        info!(?phase, has_failed, "job reached terminal phase");
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
