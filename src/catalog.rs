//! The catalog collaborator and lenient parsing of its payloads.
//!
//! A [`Catalog`] answers with opaque serialized data. Provider adapters in
//! [`crate::protocol`] normalize their wire formats into the shapes below,
//! but nothing here trusts that they did: malformed payloads parse as empty
//! results instead of failing.
//!
//! Track lists:
//!
//! ```json
//! [{ "id": 1, "name": "...", "artist": ["..."], "album": "...", "url_id": 1 }]
//! ```
//!
//! Playback URLs, either bare or as the first element of an array:
//!
//! ```json
//! { "url": "https://...", "size": 123, "br": 320 }
//! ```
//!
//! Album candidates:
//!
//! ```json
//! [{ "id": 1, "name": "...", "artist": "..." }]
//! ```

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    error::Result,
    track::{Track, TrackId},
};

/// What a search is looking for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SearchType {
    #[default]
    Song,
    Album,
}

/// Pagination and type of one search request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SearchParams {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub kind: SearchType,
}

/// Source of track metadata and playback URLs.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Searches for `keyword`, returning one page of results.
    async fn search(&self, keyword: &str, params: SearchParams) -> Result<String>;

    /// Resolves a playback reference into a playable URL payload.
    ///
    /// `quality` is the requested bitrate in kbps.
    async fn playback_url(&self, playback_ref: &TrackId, quality: u32) -> Result<String>;

    /// Lists the tracks of an album.
    async fn album(&self, id: &str) -> Result<String>;
}

/// An album found by an album search.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AlbumCandidate {
    #[serde(deserialize_with = "crate::track::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
}

/// Parses a track list. Entries that are not tracks are skipped.
#[must_use]
pub fn parse_tracks(raw: &str) -> Vec<Track> {
    parse_list(raw)
}

/// Parses one page of search results, along with the number of entries the
/// page held before malformed ones were skipped.
#[must_use]
pub fn parse_track_page(raw: &str) -> (Vec<Track>, usize) {
    parse_counted(raw)
}

/// Parses album candidates. Candidates without id or name are skipped.
#[must_use]
pub fn parse_album_candidates(raw: &str) -> Vec<AlbumCandidate> {
    parse_list::<AlbumCandidate>(raw)
        .into_iter()
        .filter(|album| !album.id.is_empty() && !album.name.is_empty())
        .collect()
}

/// Extracts a non-empty playback URL.
#[must_use]
pub fn parse_playback_url(raw: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(raw).ok()?;
    let payload = match payload {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };

    payload
        .get("url")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_list<T>(raw: &str) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    parse_counted(raw).0
}

fn parse_counted<T>(raw: &str) -> (Vec<T>, usize)
where
    T: for<'de> Deserialize<'de>,
{
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(raw) else {
        debug!("ignoring malformed catalog payload");
        return (Vec::new(), 0);
    };

    let entries = items.len();
    let items = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("skipping malformed catalog entry: {e}");
                None
            }
        })
        .collect();

    (items, entries)
}
