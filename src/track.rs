use std::{
    fmt,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Provider-specific track identifier.
///
/// Some providers use numeric ids, others opaque strings, so ids are kept
/// as strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "IdRepr")]
pub struct TrackId(pub String);

/// Ids arrive as either JSON strings or JSON numbers.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum IdRepr {
    String(String),
    Number(u64),
}

impl From<IdRepr> for TrackId {
    fn from(repr: IdRepr) -> Self {
        match repr {
            IdRepr::String(s) => Self(s),
            IdRepr::Number(n) => Self(n.to_string()),
        }
    }
}

/// Deserializes a provider id given as either a JSON string or number.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer).map(|repr| TrackId::from(repr).0)
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One downloadable item as listed by the catalog.
///
/// Field names follow the normalized catalog payload:
///
/// ```json
/// { "id": 1, "name": "...", "artist": ["..."], "album": "...", "url_id": 1 }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Track {
    pub id: TrackId,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "artist")]
    pub artists: Vec<String>,

    #[serde(default)]
    pub album: Option<String>,

    /// Reference the catalog resolves into a playable URL.
    #[serde(rename = "url_id")]
    pub playback_ref: TrackId,
}

impl Track {
    /// Whether the track is performed by `artist` alone.
    ///
    /// True iff exactly one artist is credited and that artist's name
    /// contains `artist`, ignoring case.
    #[must_use]
    pub fn is_solo_match(&self, artist: &str) -> bool {
        match self.artists.as_slice() {
            [only] => only.to_lowercase().contains(&artist.to_lowercase()),
            _ => false,
        }
    }

    /// File stem for this track: the sanitized name, or the id when the
    /// name is blank.
    #[must_use]
    pub fn file_stem(&self) -> String {
        if self.name.trim().is_empty() {
            sanitize(&self.id.0)
        } else {
            sanitize(&self.name)
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.artists.join("/"))
    }
}

/// A track bound to a destination and a requested quality for one
/// download attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTarget {
    pub track: Track,
    pub output_dir: PathBuf,
    /// Requested bitrate in kbps.
    pub quality: u32,
    pub overwrite: bool,
}

impl DownloadTarget {
    /// Extension used when the audio URL does not reveal one.
    pub const DEFAULT_EXTENSION: &'static str = ".mp3";

    /// Destination path for audio served from `url`.
    #[must_use]
    pub fn destination(&self, url: &str) -> PathBuf {
        let file_name = format!("{}{}", self.track.file_stem(), extension_of(url));
        self.output_dir.join(file_name)
    }
}

/// Extension of the last path segment of `url`, including the dot.
///
/// Query strings and fragments are ignored. Falls back to
/// [`DownloadTarget::DEFAULT_EXTENSION`].
#[must_use]
pub fn extension_of(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_owned(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_owned(),
    };

    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map_or_else(
            || DownloadTarget::DEFAULT_EXTENSION.to_owned(),
            |ext| format!(".{ext}"),
        )
}

static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("invalid file name pattern"));

/// Replaces characters that are not allowed in file names.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let cleaned = ILLEGAL_CHARS.replace_all(text, "_");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "track".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str, artists: &[&str]) -> Track {
        Track {
            id: TrackId("42".to_owned()),
            name: name.to_owned(),
            artists: artists.iter().map(|&a| a.to_owned()).collect(),
            album: None,
            playback_ref: TrackId("42".to_owned()),
        }
    }

    #[test]
    fn solo_match_requires_single_artist() {
        assert!(track("Song", &["Jay Chou"]).is_solo_match("jay"));
        assert!(!track("Song", &["Jay Chou", "Someone"]).is_solo_match("jay"));
        assert!(!track("Song", &[]).is_solo_match("jay"));
        assert!(!track("Song", &["Eason"]).is_solo_match("jay"));
    }

    #[test]
    fn deserializes_numeric_and_string_ids() {
        let json = r#"{"id": 186016, "name": "晴天", "artist": ["周杰伦"], "url_id": "186016"}"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, TrackId("186016".to_owned()));
        assert_eq!(track.playback_ref, TrackId("186016".to_owned()));
        assert_eq!(track.to_string(), "晴天 - 周杰伦");
    }

    #[test]
    fn extension_comes_from_url_path() {
        assert_eq!(extension_of("https://m7.music.126.net/a/b.flac?x=1"), ".flac");
        assert_eq!(extension_of("https://example.com/stream"), ".mp3");
        assert_eq!(extension_of("not a url/file.m4a?q"), ".m4a");
    }

    #[test]
    fn destination_uses_sanitized_name() {
        let target = DownloadTarget {
            track: track("A/B: C?", &["X"]),
            output_dir: PathBuf::from("out"),
            quality: 320,
            overwrite: false,
        };
        assert_eq!(
            target.destination("https://cdn/x.mp3"),
            PathBuf::from("out").join("A_B_ C_.mp3")
        );
    }

    #[test]
    fn blank_names_fall_back() {
        assert_eq!(track("  ", &[]).file_stem(), "42");
        assert_eq!(sanitize("***"), "___");
        assert_eq!(sanitize("  "), "track");
    }
}
