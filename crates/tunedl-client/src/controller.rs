//! Controller — single-owner event loop for all mutable state.
//!
//! All mutation of session, catalog, and sink happens inside `run()`, one
//! event at a time, in arrival order.  UI surfaces send [`UiCommand`]s in;
//! the stream reader task feeds [`StreamMessage`]s in through the same
//! channel; derived state goes out on a `tokio::sync::broadcast` channel.
//! Suspension points are exclusively at the network boundary — a command is
//! handled to completion before the next event is taken.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use tunedl_proto::config::Config;
use tunedl_proto::protocol::{EntryKind, SortRequest, StartRequest};

use crate::catalog::{CatalogClient, CatalogView, DownloadTarget, PlaylistCatalog};
use crate::jobs::JobClient;
use crate::projection::Controls;
use crate::session::Session;
use crate::sink::{LogEntry, MessageSink, Notice, Severity};
use crate::stream::{self, StreamMessage};

// ── events in and out ─────────────────────────────────────────────────────────

/// Commands a UI surface may issue.
#[derive(Debug, Clone)]
pub enum UiCommand {
    StartDownload(StartRequest),
    StopDownload,
    RetryFailed,
    /// `None` base dir falls back to the directory the last job saved into.
    RefreshCatalog { base_dir: Option<String> },
    SelectEntry { name: String, kind: EntryKind },
    SortPlaylist {
        base_dir: Option<String>,
        start_number: Option<u32>,
    },
    RemoveNumbering { base_dir: Option<String> },
    ResolveDownloadId { base_dir: Option<String> },
    ClearLog,
}

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum ControllerEvent {
    Command(UiCommand),
    Stream(StreamMessage),
}

/// What the controller broadcasts after each handled event.
#[derive(Debug, Clone)]
pub enum Update {
    /// Derived form state — recomputed after every event.
    Controls(Controls),
    Catalog(CatalogView),
    Notice(Notice),
    LogLine(LogEntry),
    /// A playlist id was resolved for the download form.
    DownloadTarget(DownloadTarget),
}

// ── controller ────────────────────────────────────────────────────────────────

pub struct Controller {
    http: reqwest::Client,
    jobs: JobClient,
    catalog_client: CatalogClient,
    session: Session,
    catalog: PlaylistCatalog,
    sink: MessageSink,
    /// Channel back into our own loop, handed to stream forwarder tasks.
    event_tx: mpsc::Sender<ControllerEvent>,
    update_tx: broadcast::Sender<Update>,
    next_conn_id: u64,
}

impl Controller {
    pub fn new(
        config: &Config,
        update_tx: broadcast::Sender<Update>,
        event_tx: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        let http = reqwest::Client::new();
        let base_url = config.server.base_url.clone();
        Self {
            jobs: JobClient::new(http.clone(), base_url.clone()),
            catalog_client: CatalogClient::new(http.clone(), base_url),
            http,
            session: Session::new(),
            catalog: PlaylistCatalog::new(),
            sink: MessageSink::new(),
            event_tx,
            update_tx,
            next_conn_id: 0,
        }
    }

    /// Run the event loop.  Returns when the event channel closes (every UI
    /// handle dropped).
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ControllerEvent>) {
        info!("controller: starting event loop");
        while let Some(event) = event_rx.recv().await {
            match event {
                ControllerEvent::Command(cmd) => {
                    debug!(?cmd, "controller: command");
                    self.handle_command(cmd).await;
                }
                ControllerEvent::Stream(msg) => self.handle_stream_message(msg),
            }
            self.flush_updates();
        }
        info!("controller: event channel closed, shutting down");
        self.session.abandon();
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::StartDownload(request) => self.start_download(request).await,
            UiCommand::StopDownload => self.stop_download().await,
            UiCommand::RetryFailed => self.retry_failed().await,
            UiCommand::RefreshCatalog { base_dir } => self.refresh_catalog(base_dir).await,
            UiCommand::SelectEntry { name, kind } => self.select_entry(&name, kind),
            UiCommand::SortPlaylist {
                base_dir,
                start_number,
            } => self.sort_playlist(base_dir, start_number).await,
            UiCommand::RemoveNumbering { base_dir } => self.remove_numbering(base_dir).await,
            UiCommand::ResolveDownloadId { base_dir } => self.resolve_download_id(base_dir).await,
            UiCommand::ClearLog => self.sink.clear_log(),
        }
    }

    async fn start_download(&mut self, request: StartRequest) {
        if request.save_dir.trim().is_empty() {
            self.sink
                .notify(Severity::Warning, "hint", "enter a save directory first");
            return;
        }
        if let Err(e) = self.session.begin_start(request.clone()) {
            self.sink.notify(Severity::Warning, "hint", e.to_string());
            return;
        }
        match self.jobs.start(&request).await {
            Ok(reply) if reply.is_success() => {
                self.sink.log(Severity::Info, "download job started");
                self.open_stream();
            }
            Ok(reply) => {
                self.session.command_failed();
                self.sink.notify(
                    Severity::Error,
                    "error",
                    reply.message_or("failed to start the download"),
                );
            }
            Err(e) => {
                self.session.command_failed();
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("unable to reach the server: {e:#}"),
                );
            }
        }
    }

    async fn stop_download(&mut self) {
        if let Err(e) = self.session.request_stop() {
            self.sink.notify(Severity::Warning, "hint", e.to_string());
            return;
        }
        // Whatever the command's fate, the phase stays Stopping: the stream
        // has the last word on how the job ended.
        match self.jobs.stop().await {
            Ok(reply) if reply.is_success() => {
                self.sink
                    .log(Severity::Info, "stop requested; waiting for the job to wind down");
            }
            Ok(reply) => {
                self.sink.notify(
                    Severity::Error,
                    "error",
                    reply.message_or("stop request refused"),
                );
            }
            Err(e) => {
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("unable to reach the server: {e:#}"),
                );
            }
        }
    }

    async fn retry_failed(&mut self) {
        let request = match self.session.begin_retry() {
            Ok(r) => r,
            Err(e) => {
                self.sink.notify(Severity::Warning, "hint", e.to_string());
                return;
            }
        };
        match self.jobs.retry_failed(&request).await {
            Ok(reply) if reply.is_success() => {
                self.sink
                    .log(Severity::Info, "retrying previously failed songs");
                self.open_stream();
            }
            Ok(reply) => {
                self.session.command_failed();
                self.sink.notify(
                    Severity::Error,
                    "error",
                    reply.message_or("failed to start the retry"),
                );
            }
            Err(e) => {
                self.session.command_failed();
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("unable to reach the server: {e:#}"),
                );
            }
        }
    }

    /// Spawn the stream reader for a freshly accepted job and hand its
    /// handle to the session.  A forwarder task bridges the reader's channel
    /// into our own loop, so stream events queue behind whatever else is in
    /// flight and are handled strictly one at a time.
    fn open_stream(&mut self) {
        self.next_conn_id += 1;
        let conn_id = self.next_conn_id;

        let (tx, mut rx) = mpsc::channel::<StreamMessage>(64);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if event_tx.send(ControllerEvent::Stream(msg)).await.is_err() {
                    break;
                }
            }
        });

        let handle = stream::connect(self.http.clone(), self.jobs.stream_url(), conn_id, tx);
        self.session.command_succeeded(handle);
    }

    fn handle_stream_message(&mut self, msg: StreamMessage) {
        match msg {
            StreamMessage::Event { conn_id, event } => {
                self.session.apply_event(conn_id, event, &mut self.sink)
            }
            StreamMessage::Closed { conn_id } => {
                self.session.stream_disconnected(conn_id, &mut self.sink)
            }
        }
    }

    // ── catalog handlers ──────────────────────────────────────────────────────

    async fn refresh_catalog(&mut self, base_dir: Option<String>) {
        let Some(dir) = self.catalog_dir(base_dir) else {
            self.sink
                .notify(Severity::Warning, "hint", "enter a music directory first");
            return;
        };
        self.catalog.begin_refresh();
        // Let the pane show its loading state while the fetch runs.
        let _ = self.update_tx.send(Update::Catalog(self.catalog.view()));

        match self.catalog_client.fetch_listing(&dir).await {
            Ok(reply) => {
                if reply.playlists.is_empty() {
                    let message = reply
                        .message
                        .unwrap_or_else(|| "no playlists found".to_string());
                    self.sink.log(Severity::Info, message);
                }
                self.catalog.refresh_succeeded(reply.playlists);
            }
            Err(e) => {
                self.catalog.refresh_failed(format!("{e:#}"));
                self.sink.notify(
                    Severity::Error,
                    "error",
                    "could not refresh the playlist list",
                );
            }
        }
    }

    fn select_entry(&mut self, name: &str, kind: EntryKind) {
        if !self.catalog.select(name, kind) {
            self.sink.notify(
                Severity::Warning,
                "hint",
                "that entry is no longer in the list",
            );
        }
    }

    async fn sort_playlist(&mut self, base_dir: Option<String>, start_number: Option<u32>) {
        let Some((dir, name)) = self.catalog_target(base_dir) else {
            return;
        };
        // Local validation: the start number never reaches the server unless
        // it parsed into range.
        let Some(start) = start_number else {
            self.sink
                .notify(Severity::Warning, "hint", "enter a valid start number");
            return;
        };
        let request = SortRequest {
            base_dir: dir,
            playlist_name: name,
            start_number: Some(start),
        };
        match self.catalog_client.sort_playlist(&request).await {
            Ok(reply) => {
                let severity = if reply.is_success() {
                    Severity::Success
                } else {
                    Severity::Error
                };
                self.sink
                    .notify(severity, "sort result", reply.message_or("done"));
            }
            Err(e) => {
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("sort failed: {e:#}"),
                );
            }
        }
    }

    async fn remove_numbering(&mut self, base_dir: Option<String>) {
        let Some((dir, name)) = self.catalog_target(base_dir) else {
            return;
        };
        let request = SortRequest {
            base_dir: dir,
            playlist_name: name,
            start_number: None,
        };
        match self.catalog_client.remove_numbering(&request).await {
            Ok(reply) => {
                let severity = if reply.is_success() {
                    Severity::Success
                } else {
                    Severity::Error
                };
                self.sink
                    .notify(severity, "numbering result", reply.message_or("done"));
            }
            Err(e) => {
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("remove-numbering failed: {e:#}"),
                );
            }
        }
    }

    async fn resolve_download_id(&mut self, base_dir: Option<String>) {
        let Some((dir, name)) = self.catalog_target(base_dir) else {
            return;
        };
        let kind = match self.catalog.selection() {
            Some(entry) => entry.kind,
            None => return,
        };
        match self.catalog_client.resolve_playlist_id(&dir, &name).await {
            Ok(reply) => match reply.playlist_id {
                Some(id) if !id.is_empty() => {
                    let target = DownloadTarget {
                        playlist_id: id,
                        parse_method: kind.parse_method(),
                    };
                    let _ = self.update_tx.send(Update::DownloadTarget(target));
                    self.sink.notify(
                        Severity::Success,
                        "ready",
                        "playlist id copied to the download form",
                    );
                }
                _ => {
                    self.sink.notify(
                        Severity::Error,
                        "error",
                        reply
                            .message
                            .unwrap_or_else(|| "playlist id not found".to_string()),
                    );
                }
            },
            Err(e) => {
                self.sink.notify(
                    Severity::Error,
                    "network error",
                    format!("could not resolve the playlist id: {e:#}"),
                );
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Resolve the catalog's search path: an explicit non-empty value wins,
    /// then the directory the last job saved into.  An explicitly empty value
    /// is a validation failure, not a fallback.
    fn catalog_dir(&self, explicit: Option<String>) -> Option<String> {
        match explicit {
            Some(dir) if !dir.trim().is_empty() => Some(dir),
            Some(_) => None,
            None => self
                .session
                .last_server_directory()
                .map(|p| p.display().to_string()),
        }
    }

    /// Directory + selected playlist name, or a hint if either is missing.
    /// Every dependent catalog action aborts without one.
    fn catalog_target(&mut self, base_dir: Option<String>) -> Option<(String, String)> {
        let Some(dir) = self.catalog_dir(base_dir) else {
            self.sink
                .notify(Severity::Warning, "hint", "enter a music directory first");
            return None;
        };
        let Some(entry) = self.catalog.selection() else {
            self.sink
                .notify(Severity::Warning, "hint", "select a playlist first");
            return None;
        };
        Some((dir, entry.name.clone()))
    }

    fn flush_updates(&mut self) {
        for entry in self.sink.drain_new_entries() {
            let _ = self.update_tx.send(Update::LogLine(entry));
        }
        for notice in self.sink.drain_notices() {
            let _ = self.update_tx.send(Update::Notice(notice));
        }
        let _ = self
            .update_tx
            .send(Update::Controls(Controls::derive(&self.session)));
        let _ = self.update_tx.send(Update::Catalog(self.catalog.view()));
    }
}
