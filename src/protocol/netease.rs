//! NetEase Cloud Music catalog adapter.
//!
//! Talks to the legacy, unencrypted web API and normalizes its answers into
//! the payload shapes documented in [`crate::catalog`].
//!
//! # Wire Format
//!
//! Song search (`type=1`):
//! ```json
//! {
//!     "code": 200,
//!     "result": {
//!         "songs": [{
//!             "id": 186016,
//!             "name": "晴天",
//!             "artists": [{ "id": 6452, "name": "周杰伦" }],
//!             "album": { "id": 18905, "name": "叶惠美" }
//!         }],
//!         "songCount": 300
//!     }
//! }
//! ```
//!
//! Album search (`type=10`) returns `result.albums` with `id`, `name` and
//! `artist`/`artists`. Playback URLs come as `data: [{ id, url, br, size }]`.
//! Album details nest their songs under `album.songs`.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderValue, REFERER},
    Url,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, VecSkipError};

use crate::{
    catalog::{Catalog, SearchParams, SearchType},
    config::Config,
    error::{Error, HttpStatus, Result},
    http::Client as HttpClient,
    track::TrackId,
};

use super::json;

pub struct Netease {
    http_client: HttpClient,
}

impl Netease {
    /// Origin of the web API; the operator's cookie is scoped to it.
    const API_ORIGIN: &'static str = "https://music.163.com/";

    const SEARCH_PATH: &'static str = "api/search/get/web";
    const PLAYER_URL_PATH: &'static str = "api/song/enhance/player/url";
    const ALBUM_PATH: &'static str = "api/album/";

    /// Search type codes of the web API.
    const TYPE_SONG: u32 = 1;
    const TYPE_ALBUM: u32 = 10;

    /// The web API rejects requests without a matching `Referer`.
    const REFERER_VALUE: HeaderValue = HeaderValue::from_static("https://music.163.com/");

    /// Creates a new adapter sending the configured cookie.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = HttpClient::for_origin(config, &Self::origin())?;
        Ok(Self { http_client })
    }

    /// # Panics
    ///
    /// Will panic if the origin URL is invalid.
    fn origin() -> Url {
        Url::parse(Self::API_ORIGIN).expect("invalid api origin")
    }

    fn endpoint(path: &str) -> Result<Url> {
        Self::origin().join(path).map_err(Into::into)
    }

    /// Performs a rate-limited GET and returns the response text.
    async fn get_text(&self, url: Url) -> Result<String> {
        let mut request = self.http_client.get(url);
        request.headers_mut().insert(REFERER, Self::REFERER_VALUE);

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::catalog(HttpStatus(status)));
        }

        response.text().await.map_err(Error::catalog)
    }
}

#[async_trait]
impl Catalog for Netease {
    async fn search(&self, keyword: &str, params: SearchParams) -> Result<String> {
        let kind = match params.kind {
            SearchType::Song => Self::TYPE_SONG,
            SearchType::Album => Self::TYPE_ALBUM,
        };
        let offset = params.page.saturating_sub(1) * params.page_size;

        let mut url = Self::endpoint(Self::SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("s", keyword)
            .append_pair("type", &kind.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &params.page_size.to_string());

        let body = self.get_text(url).await?;
        let response: SearchResponse = json(&body, "search").unwrap_or_default();

        let result = response.result.unwrap_or_default();
        match params.kind {
            SearchType::Song => normalize_songs(result.songs),
            SearchType::Album => normalize_albums(result.albums),
        }
    }

    async fn playback_url(&self, playback_ref: &TrackId, quality: u32) -> Result<String> {
        let mut url = Self::endpoint(Self::PLAYER_URL_PATH)?;
        url.query_pairs_mut()
            .append_pair("ids", &format!("[{playback_ref}]"))
            .append_pair("br", &(u64::from(quality) * 1000).to_string());

        let body = self.get_text(url).await?;
        let response: UrlResponse = json(&body, "player url").unwrap_or_default();

        normalize_playback_url(response)
    }

    async fn album(&self, id: &str) -> Result<String> {
        let url = Self::endpoint(&format!("{}{id}", Self::ALBUM_PATH))?;

        let body = self.get_text(url).await?;
        let response: AlbumResponse = json(&body, "album").unwrap_or_default();

        let songs = match response.album {
            Some(album) if !album.songs.is_empty() => album.songs,
            _ => response.songs,
        };
        normalize_songs(songs)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Option<SearchResult>,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
struct SearchResult {
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    songs: Vec<Song>,
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    albums: Vec<Album>,
}

#[derive(Clone, Debug, Deserialize)]
struct Song {
    #[serde(deserialize_with = "crate::track::string_or_number")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "ar")]
    artists: Vec<Artist>,
    #[serde(default, alias = "al")]
    album: Option<AlbumRef>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Artist {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct AlbumRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Album {
    #[serde(deserialize_with = "crate::track::string_or_number")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artist: Option<Artist>,
    #[serde(default)]
    artists: Vec<Artist>,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
struct AlbumResponse {
    #[serde(default)]
    album: Option<AlbumDetail>,
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    songs: Vec<Song>,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
struct AlbumDetail {
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct UrlResponse {
    #[serde(default)]
    data: Vec<UrlData>,
}

#[derive(Clone, Debug, Deserialize)]
struct UrlData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    br: Option<u64>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Serialize)]
struct NormalizedTrack<'a> {
    id: &'a str,
    name: &'a str,
    artist: Vec<&'a str>,
    album: &'a str,
    url_id: &'a str,
    source: &'static str,
}

#[derive(Serialize)]
struct NormalizedAlbum<'a> {
    id: &'a str,
    name: &'a str,
    artist: String,
}

#[derive(Serialize)]
struct NormalizedUrl<'a> {
    url: &'a str,
    size: u64,
    br: u64,
}

fn artist_names(artists: &[Artist]) -> Vec<&str> {
    artists
        .iter()
        .filter_map(|artist| artist.name.as_deref())
        .collect()
}

fn normalize_songs(songs: Vec<Song>) -> Result<String> {
    let tracks: Vec<_> = songs
        .iter()
        .map(|song| NormalizedTrack {
            id: &song.id,
            name: song.name.as_deref().unwrap_or_default(),
            artist: artist_names(&song.artists),
            album: song
                .album
                .as_ref()
                .and_then(|album| album.name.as_deref())
                .unwrap_or_default(),
            url_id: &song.id,
            source: "netease",
        })
        .collect();

    serde_json::to_string(&tracks).map_err(Into::into)
}

fn normalize_albums(albums: Vec<Album>) -> Result<String> {
    let albums: Vec<_> = albums
        .iter()
        .map(|album| NormalizedAlbum {
            id: &album.id,
            name: album.name.as_deref().unwrap_or_default(),
            artist: match album.artist.as_ref().and_then(|a| a.name.as_deref()) {
                Some(name) => name.to_owned(),
                None => artist_names(&album.artists).join("/"),
            },
        })
        .collect();

    serde_json::to_string(&albums).map_err(Into::into)
}

fn normalize_playback_url(response: UrlResponse) -> Result<String> {
    // Tracks without license come back with a `null` url.
    let url = response
        .data
        .iter()
        .find_map(|data| data.url.as_deref().map(|url| (url, data)));

    match url {
        Some((url, data)) => serde_json::to_string(&NormalizedUrl {
            url,
            size: data.size.unwrap_or_default(),
            br: data.br.unwrap_or_default() / 1000,
        })
        .map_err(Into::into),
        None => Ok("{\"url\":\"\"}".to_owned()),
    }
}
