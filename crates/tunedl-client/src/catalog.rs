//! Playlist catalog — listing, selection, and the dependent server actions.
//!
//! [`PlaylistCatalog`] is the state half: the fetched listing and the single
//! selection, which is keyed to the listing instance — any refresh discards
//! it, name match or not.  [`CatalogClient`] is the HTTP half.

use anyhow::{Context, Result};
use tunedl_proto::protocol::{
    ApiReply, CatalogReply, EntryKind, ParseMethod, PlaylistEntry, PlaylistIdReply, SortRequest,
};

/// Display state of the catalog pane.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatalogStatus {
    /// Never refreshed.
    #[default]
    Idle,
    Loading,
    Ready,
    /// The last refresh failed; the listing is unusable until the next one.
    Unavailable(String),
}

/// Selection by name + kind into a specific listing generation, not by index
/// or object identity.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectionRef {
    name: String,
    kind: EntryKind,
    generation: u64,
}

/// Everything a UI needs to render the catalog pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogView {
    pub status: CatalogStatus,
    pub entries: Vec<PlaylistEntry>,
    pub selected: Option<PlaylistEntry>,
}

/// A resolved download target, ready to seed the download form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub playlist_id: String,
    pub parse_method: ParseMethod,
}

pub struct PlaylistCatalog {
    listing: Vec<PlaylistEntry>,
    status: CatalogStatus,
    /// Bumped whenever the listing is replaced; selections on older
    /// generations never resolve.
    generation: u64,
    selected: Option<SelectionRef>,
}

impl PlaylistCatalog {
    pub fn new() -> Self {
        Self {
            listing: Vec::new(),
            status: CatalogStatus::Idle,
            generation: 0,
            selected: None,
        }
    }

    pub fn status(&self) -> &CatalogStatus {
        &self.status
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.listing
    }

    pub fn begin_refresh(&mut self) {
        self.status = CatalogStatus::Loading;
    }

    /// Replace the listing wholesale.  The previous listing and any
    /// selection on it are gone, even if the same names reappear.
    pub fn refresh_succeeded(&mut self, listing: Vec<PlaylistEntry>) {
        self.generation += 1;
        self.listing = listing;
        self.selected = None;
        self.status = CatalogStatus::Ready;
    }

    pub fn refresh_failed(&mut self, reason: String) {
        self.generation += 1;
        self.listing.clear();
        self.selected = None;
        self.status = CatalogStatus::Unavailable(reason);
    }

    /// Select an entry of the current listing.  Returns false when no such
    /// entry exists.  Selecting over a previous selection just replaces it.
    pub fn select(&mut self, name: &str, kind: EntryKind) -> bool {
        if !self
            .listing
            .iter()
            .any(|e| e.name == name && e.kind == kind)
        {
            return false;
        }
        self.selected = Some(SelectionRef {
            name: name.to_string(),
            kind,
            generation: self.generation,
        });
        true
    }

    /// The selected entry, if it still belongs to the current listing.
    /// `None` is an expected, recoverable condition for callers to turn into
    /// a hint.
    pub fn selection(&self) -> Option<&PlaylistEntry> {
        let sel = self.selected.as_ref()?;
        if sel.generation != self.generation {
            return None;
        }
        self.listing
            .iter()
            .find(|e| e.name == sel.name && e.kind == sel.kind)
    }

    pub fn view(&self) -> CatalogView {
        CatalogView {
            status: self.status.clone(),
            entries: self.listing.clone(),
            selected: self.selection().cloned(),
        }
    }
}

impl Default for PlaylistCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ── HTTP half ─────────────────────────────────────────────────────────────────

pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_listing(&self, base_dir: &str) -> Result<CatalogReply> {
        let response = self
            .http
            .get(format!("{}/get-playlists", self.base_url))
            .query(&[("path", base_dir)])
            .send()
            .await
            .context("failed to fetch playlist listing")?;
        response
            .json()
            .await
            .context("failed to parse playlist listing")
    }

    pub async fn resolve_playlist_id(
        &self,
        base_dir: &str,
        playlist: &str,
    ) -> Result<PlaylistIdReply> {
        let response = self
            .http
            .get(format!("{}/get-playlist-id", self.base_url))
            .query(&[("path", base_dir), ("playlist", playlist)])
            .send()
            .await
            .context("failed to resolve playlist id")?;
        response
            .json()
            .await
            .context("failed to parse playlist id reply")
    }

    pub async fn sort_playlist(&self, request: &SortRequest) -> Result<ApiReply> {
        let response = self
            .http
            .post(format!("{}/sort-playlist", self.base_url))
            .json(request)
            .send()
            .await
            .context("failed to send sort request")?;
        response.json().await.context("failed to parse sort reply")
    }

    pub async fn remove_numbering(&self, request: &SortRequest) -> Result<ApiReply> {
        let response = self
            .http
            .post(format!("{}/remove-numbering", self.base_url))
            .json(request)
            .send()
            .await
            .context("failed to send remove-numbering request")?;
        response
            .json()
            .await
            .context("failed to parse remove-numbering reply")
    }
}
