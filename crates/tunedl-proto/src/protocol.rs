use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Marker older servers embed in a plain log line when announcing where a
/// job's files landed.  Newer servers set the structured `saved_to` field on
/// the log event instead; the marker scan exists only for compatibility.
pub const SAVED_TO_MARKER: &str = "saved to: ";

/// Events emitted by the server on the `/stream` connection, one JSON object
/// per event, tagged by `type`.  Consumed exactly once, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Log {
        message: String,
        /// Directory the job is saving into.  Absent on servers that only
        /// embed [`SAVED_TO_MARKER`] in `message`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        saved_to: Option<PathBuf>,
    },
    Progress {
        /// Percent complete.  May be out of range on the wire; clamp before
        /// display.
        progress: f64,
        status_text: String,
    },
    Done {
        message: String,
        #[serde(default)]
        has_failed: bool,
        #[serde(default)]
        failed_count: u32,
        #[serde(default)]
        success_count: u32,
    },
    Stopped {
        message: String,
        #[serde(default)]
        has_failed: bool,
        #[serde(default)]
        failed_count: u32,
        #[serde(default)]
        success_count: u32,
    },
    Error {
        message: String,
        /// A bare error carries no per-item failures; retry is only offered
        /// when the server says so explicitly.
        #[serde(default)]
        has_failed: bool,
    },
}

impl StreamEvent {
    /// The save directory announced by a log event, if any.  Prefers the
    /// structured field, falls back to the legacy text marker.
    pub fn saved_directory(&self) -> Option<PathBuf> {
        let StreamEvent::Log { message, saved_to } = self else {
            return None;
        };
        if let Some(dir) = saved_to {
            return Some(dir.clone());
        }
        message
            .split_once(SAVED_TO_MARKER)
            .map(|(_, rest)| PathBuf::from(rest.trim()))
    }

    /// True for events after which no further events for the job arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Stopped { .. } | StreamEvent::Error { .. }
        )
    }
}

/// Outcome field shared by every job-control and playlist action reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiReply {
    pub status: ApiStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        self.status == ApiStatus::Success
    }

    /// The server's message, or `fallback` when it sent none.
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// How the server should interpret the target URL / id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    #[default]
    Playlist,
    Album,
    Song,
}

/// Audio quality tiers understood by the download backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    #[default]
    Exhigh,
    Lossless,
    Hires,
    Jymaster,
}

/// Which resolver backend the server asks for song URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadApi {
    #[default]
    Vkeys,
    Bugpk,
    Ss22y,
    Iwenwiki,
}

/// Form body of `POST /start-download`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub save_dir: String,
    pub playlist_url: String,
    pub parse_method: ParseMethod,
    pub quality: Quality,
    pub download_lyrics_original: bool,
    pub download_lyrics_translated: bool,
    pub download_api: DownloadApi,
}

impl StartRequest {
    /// The retry command re-issues the same quality / lyrics / backend
    /// parameters; the server already knows which items failed.
    pub fn retry_request(&self) -> RetryRequest {
        RetryRequest {
            quality: self.quality,
            download_lyrics: self.download_lyrics_original,
            download_lyrics_translated: self.download_lyrics_translated,
            download_api: self.download_api,
        }
    }
}

/// JSON body of `POST /retry-failed-songs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRequest {
    pub quality: Quality,
    pub download_lyrics: bool,
    pub download_lyrics_translated: bool,
    pub download_api: DownloadApi,
}

/// One entry in a catalog listing.  Names are unique within a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Playlist,
    Album,
}

impl EntryKind {
    /// The parse method a download of this entry should use.
    pub fn parse_method(self) -> ParseMethod {
        match self {
            EntryKind::Playlist => ParseMethod::Playlist,
            EntryKind::Album => ParseMethod::Album,
        }
    }
}

/// Reply of `GET /get-playlists?path=..`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogReply {
    #[serde(default)]
    pub playlists: Vec<PlaylistEntry>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply of `GET /get-playlist-id?path=..&playlist=..`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistIdReply {
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// JSON body shared by `POST /sort-playlist` and `POST /remove-numbering`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortRequest {
    pub base_dir: String,
    pub playlist_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_number: Option<u32>,
}
