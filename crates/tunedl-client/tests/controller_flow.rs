//! End-to-end controller tests against a loopback stand-in for the download
//! server: the job-control routes plus a live `/stream` connection whose
//! frames the tests script.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Form, Json, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use tunedl_client::catalog::CatalogStatus;
use tunedl_client::controller::{Controller, ControllerEvent, UiCommand, Update};
use tunedl_client::projection::Controls;
use tunedl_client::sink::{Notice, Severity};
use tunedl_proto::config::Config;
use tunedl_proto::protocol::{
    DownloadApi, EntryKind, ParseMethod, PlaylistEntry, Quality, RetryRequest, SortRequest,
    StartRequest, StreamEvent,
};

// ── fake server ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    stream_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    retries: Mutex<Vec<RetryRequest>>,
    sorts: Mutex<Vec<SortRequest>>,
    catalog_hits: AtomicUsize,
    refuse_start: AtomicBool,
    stream_connections: AtomicUsize,
}

impl ServerState {
    /// Push one event onto the live stream, waiting for the client to have
    /// connected first.
    async fn push_event(&self, event: &StreamEvent) {
        let frame = format!("data: {}\n\n", serde_json::to_string(event).unwrap());
        for _ in 0..200 {
            if let Some(tx) = self.stream_tx.lock().unwrap().as_ref() {
                tx.send(frame).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no stream connection arrived");
    }

    /// Wait until the n-th `/stream` connection has arrived.  Needed before
    /// pushing frames for a rerun, so they land on the fresh connection and
    /// not the superseded one.
    async fn wait_connections(&self, n: usize) {
        for _ in 0..200 {
            if self.stream_connections.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stream connection {} never arrived", n);
    }

    /// Drop the live stream connection without a terminal event.
    async fn drop_stream(&self) {
        for _ in 0..200 {
            if self.stream_tx.lock().unwrap().take().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no stream connection to drop");
    }
}

async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Form(_request): Form<StartRequest>,
) -> Json<serde_json::Value> {
    if state.refuse_start.load(Ordering::SeqCst) {
        return Json(serde_json::json!({"status": "error", "message": "busy"}));
    }
    state.starts.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({"status": "success", "message": "download job started"}))
}

async fn stop_handler(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    state.stops.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({"status": "success", "message": "stop signal sent"}))
}

async fn retry_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RetryRequest>,
) -> Json<serde_json::Value> {
    state.retries.lock().unwrap().push(request);
    Json(serde_json::json!({"status": "success", "message": "retry started"}))
}

async fn stream_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    *state.stream_tx.lock().unwrap() = Some(tx);
    state.stream_connections.fetch_add(1, Ordering::SeqCst);
    let body = Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<Bytes, std::io::Error>(frame.into()), rx))
    }));
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn playlists_handler(
    State(state): State<Arc<ServerState>>,
    Query(_params): Query<std::collections::HashMap<String, String>>,
) -> Json<serde_json::Value> {
    state.catalog_hits.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({
        "playlists": [
            {"name": "Night Drive", "type": "album"},
            {"name": "Morning Mix", "type": "playlist"},
        ]
    }))
}

async fn playlist_id_handler(
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Json<serde_json::Value> {
    assert!(params.contains_key("path") && params.contains_key("playlist"));
    Json(serde_json::json!({"playlist_id": "424242"}))
}

async fn sort_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SortRequest>,
) -> Json<serde_json::Value> {
    state.sorts.lock().unwrap().push(request);
    Json(serde_json::json!({"status": "success", "message": "sorted 7 songs"}))
}

async fn remove_numbering_handler(
    Json(_request): Json<SortRequest>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "success", "message": "renamed 7 files"}))
}

async fn spawn_server() -> (Arc<ServerState>, String) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/start-download", post(start_handler))
        .route("/stop-download", post(stop_handler))
        .route("/retry-failed-songs", post(retry_handler))
        .route("/stream", get(stream_handler))
        .route("/get-playlists", get(playlists_handler))
        .route("/get-playlist-id", get(playlist_id_handler))
        .route("/sort-playlist", post(sort_handler))
        .route("/remove-numbering", post(remove_numbering_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, format!("http://{}", addr))
}

// ── harness ───────────────────────────────────────────────────────────────────

struct Harness {
    commands: mpsc::Sender<ControllerEvent>,
    updates: broadcast::Receiver<Update>,
}

impl Harness {
    async fn spawn(base_url: String) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let mut config = Config::default();
        config.server.base_url = base_url;

        let (event_tx, event_rx) = mpsc::channel::<ControllerEvent>(64);
        let (update_tx, update_rx) = broadcast::channel::<Update>(256);
        let controller = Controller::new(&config, update_tx, event_tx.clone());
        tokio::spawn(controller.run(event_rx));

        Self {
            commands: event_tx,
            updates: update_rx,
        }
    }

    async fn send(&self, cmd: UiCommand) {
        self.commands
            .send(ControllerEvent::Command(cmd))
            .await
            .unwrap();
    }

    async fn next_update(&mut self) -> Update {
        loop {
            match timeout(Duration::from_secs(5), self.updates.recv()).await {
                Ok(Ok(update)) => return update,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(e)) => panic!("update channel closed: {}", e),
                Err(_) => panic!("timed out waiting for an update"),
            }
        }
    }

    async fn wait_controls(&mut self, pred: impl Fn(&Controls) -> bool) -> Controls {
        loop {
            if let Update::Controls(controls) = self.next_update().await {
                if pred(&controls) {
                    return controls;
                }
            }
        }
    }

    async fn wait_notice(&mut self, pred: impl Fn(&Notice) -> bool) -> Notice {
        loop {
            if let Update::Notice(notice) = self.next_update().await {
                if pred(&notice) {
                    return notice;
                }
            }
        }
    }
}

fn request() -> StartRequest {
    StartRequest {
        save_dir: "/music".to_string(),
        playlist_url: "8244816".to_string(),
        parse_method: ParseMethod::Playlist,
        quality: Quality::Lossless,
        download_lyrics_original: true,
        download_lyrics_translated: false,
        download_api: DownloadApi::Vkeys,
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_progress_done_flow() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness.send(UiCommand::StartDownload(request())).await;
    harness
        .wait_controls(|c| c.form_locked && c.stop_enabled)
        .await;

    server
        .push_event(&StreamEvent::Progress {
            progress: 42.0,
            status_text: "downloading 3/7".to_string(),
        })
        .await;
    let controls = harness.wait_controls(|c| c.percent == 42).await;
    assert_eq!(controls.status_text, "downloading 3/7");
    assert!(!controls.start_enabled);

    server
        .push_event(&StreamEvent::Done {
            message: "All 7 succeeded".to_string(),
            has_failed: false,
            failed_count: 0,
            success_count: 7,
        })
        .await;
    let notice = harness
        .wait_notice(|n| n.body == "All 7 succeeded")
        .await;
    assert_eq!(notice.severity, Severity::Success);
    let controls = harness.wait_controls(|c| c.start_enabled).await;
    assert!(!controls.retry_visible);
    assert_eq!(controls.status_text, "finished");
    assert_eq!(server.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_start_rejected_then_stop() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness.send(UiCommand::StartDownload(request())).await;
    harness.wait_controls(|c| c.stop_enabled).await;

    harness.send(UiCommand::StartDownload(request())).await;
    let notice = harness
        .wait_notice(|n| n.severity == Severity::Warning)
        .await;
    assert!(notice.body.contains("already running"));
    assert_eq!(server.starts.load(Ordering::SeqCst), 1);

    harness.send(UiCommand::StopDownload).await;
    let controls = harness
        .wait_controls(|c| c.form_locked && !c.stop_enabled)
        .await;
    assert_eq!(controls.status_text, "stopping...");

    server
        .push_event(&StreamEvent::Stopped {
            message: "stopped at 4/7".to_string(),
            has_failed: false,
            failed_count: 0,
            success_count: 4,
        })
        .await;
    let controls = harness.wait_controls(|c| c.start_enabled).await;
    assert_eq!(controls.status_text, "stopped");
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_after_partial_failure() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness.send(UiCommand::StartDownload(request())).await;
    harness.wait_controls(|c| c.stop_enabled).await;

    server
        .push_event(&StreamEvent::Done {
            message: "5 succeeded, 2 failed".to_string(),
            has_failed: true,
            failed_count: 2,
            success_count: 5,
        })
        .await;
    let notice = harness
        .wait_notice(|n| n.body == "5 succeeded, 2 failed")
        .await;
    assert_eq!(notice.severity, Severity::Warning);
    harness
        .wait_controls(|c| c.retry_visible && c.start_enabled)
        .await;

    harness.send(UiCommand::RetryFailed).await;
    harness.wait_controls(|c| c.stop_enabled).await;
    server.wait_connections(2).await;
    {
        let retries = server.retries.lock().unwrap();
        assert_eq!(retries.as_slice(), &[request().retry_request()]);
    }

    server
        .push_event(&StreamEvent::Done {
            message: "2 succeeded".to_string(),
            has_failed: false,
            failed_count: 0,
            success_count: 2,
        })
        .await;
    let controls = harness
        .wait_controls(|c| c.start_enabled && !c.retry_visible)
        .await;
    assert_eq!(controls.status_text, "finished");
    // The first job went through /start-download, the second through retry.
    assert_eq!(server.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unexpected_disconnect_reenables_controls() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness.send(UiCommand::StartDownload(request())).await;
    harness.wait_controls(|c| c.stop_enabled).await;
    server
        .push_event(&StreamEvent::Progress {
            progress: 10.0,
            status_text: "downloading 1/7".to_string(),
        })
        .await;
    harness.wait_controls(|c| c.percent == 10).await;

    server.drop_stream().await;
    let notice = harness
        .wait_notice(|n| n.title == "connection lost")
        .await;
    assert_eq!(notice.severity, Severity::Error);
    let controls = harness.wait_controls(|c| c.start_enabled).await;
    assert_eq!(controls.status_text, "disconnected");
    assert!(!controls.retry_visible);
}

#[tokio::test]
async fn test_start_refused_by_server_reverts_phase() {
    let (server, base_url) = spawn_server().await;
    server.refuse_start.store(true, Ordering::SeqCst);
    let mut harness = Harness::spawn(base_url).await;

    harness.send(UiCommand::StartDownload(request())).await;
    let notice = harness
        .wait_notice(|n| n.severity == Severity::Error)
        .await;
    assert_eq!(notice.body, "busy");
    let controls = harness.wait_controls(|c| c.start_enabled).await;
    assert!(!controls.form_locked);
    assert_eq!(server.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_catalog_refresh_select_resolve_and_sort() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness
        .send(UiCommand::RefreshCatalog {
            base_dir: Some("/music".to_string()),
        })
        .await;
    loop {
        if let Update::Catalog(view) = harness.next_update().await {
            if view.status == CatalogStatus::Ready {
                assert_eq!(
                    view.entries,
                    vec![
                        PlaylistEntry {
                            name: "Night Drive".to_string(),
                            kind: EntryKind::Album
                        },
                        PlaylistEntry {
                            name: "Morning Mix".to_string(),
                            kind: EntryKind::Playlist
                        },
                    ]
                );
                assert!(view.selected.is_none());
                break;
            }
        }
    }

    harness
        .send(UiCommand::SelectEntry {
            name: "Night Drive".to_string(),
            kind: EntryKind::Album,
        })
        .await;
    harness
        .send(UiCommand::ResolveDownloadId {
            base_dir: Some("/music".to_string()),
        })
        .await;
    loop {
        if let Update::DownloadTarget(target) = harness.next_update().await {
            assert_eq!(target.playlist_id, "424242");
            assert_eq!(target.parse_method, ParseMethod::Album);
            break;
        }
    }

    harness
        .send(UiCommand::SortPlaylist {
            base_dir: Some("/music".to_string()),
            start_number: Some(500),
        })
        .await;
    let notice = harness
        .wait_notice(|n| n.severity == Severity::Success && n.title == "sort result")
        .await;
    assert_eq!(notice.body, "sorted 7 songs");
    {
        let sorts = server.sorts.lock().unwrap();
        assert_eq!(
            sorts.as_slice(),
            &[SortRequest {
                base_dir: "/music".to_string(),
                playlist_name: "Night Drive".to_string(),
                start_number: Some(500),
            }]
        );
    }
}

#[tokio::test]
async fn test_empty_catalog_dir_never_hits_the_network() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness
        .send(UiCommand::RefreshCatalog {
            base_dir: Some("  ".to_string()),
        })
        .await;
    let notice = harness
        .wait_notice(|n| n.severity == Severity::Warning)
        .await;
    assert!(notice.body.contains("music directory"));
    assert_eq!(server.catalog_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sort_without_selection_is_a_local_hint() {
    let (server, base_url) = spawn_server().await;
    let mut harness = Harness::spawn(base_url).await;

    harness
        .send(UiCommand::SortPlaylist {
            base_dir: Some("/music".to_string()),
            start_number: Some(1),
        })
        .await;
    let notice = harness
        .wait_notice(|n| n.severity == Severity::Warning)
        .await;
    assert!(notice.body.contains("select a playlist"));
    assert!(server.sorts.lock().unwrap().is_empty());
}
