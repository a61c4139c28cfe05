//! Operator-supplied cookie credential for authenticated catalog requests.
//!
//! The credential is a `Cookie` request header value such as
//! `MUSIC_U=...; __csrf=...`, typically produced by the `cookie` command.
//! It can be given directly or loaded from a file that contains either the
//! raw header value or a TOML table:
//!
//! ```toml
//! cookie = "MUSIC_U=...; __csrf=..."
//! ```
//!
//! The value is redacted from `Debug` output so that it does not end up in
//! logs.

use std::{fmt, fs, path::Path, str::FromStr};

use veil::Redact;

use crate::error::{Error, Result};

/// A `Cookie` header value.
#[derive(Clone, PartialEq, Eq, Hash, Redact)]
pub struct Cookie(#[redact] String);

impl Cookie {
    /// Cookie files should be small; refuse to read anything larger.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Loads a cookie from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, or holds
    /// no cookie.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: cookie files should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let value = match contents.parse::<toml::Table>() {
            Ok(table) => match table.get("cookie").and_then(toml::Value::as_str) {
                Some(cookie) => cookie.to_owned(),
                None => contents,
            },
            Err(_) => contents,
        };

        value.parse().map_err(|_: Error| {
            Error::invalid_argument(format!("{} holds no cookie", path.display()))
        })
    }

    /// Iterates over the `name=value` pairs of the header value.
    ///
    /// Fragments without `=` are skipped.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.split(';').filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then_some((name, value.trim()))
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Cookie {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_argument("cookie is empty"));
        }

        Ok(Self(trimmed.to_owned()))
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_and_trims() {
        let cookie: Cookie = "  MUSIC_U=abc; __csrf=def \n".parse().unwrap();
        assert_eq!(cookie.as_str(), "MUSIC_U=abc; __csrf=def");
        assert_eq!(
            cookie.pairs().collect::<Vec<_>>(),
            vec![("MUSIC_U", "abc"), ("__csrf", "def")]
        );
    }

    #[test]
    fn empty_cookie_is_rejected() {
        let err = " \n".parse::<Cookie>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn debug_output_is_redacted() {
        let cookie: Cookie = "MUSIC_U=secret".parse().unwrap();
        assert!(!format!("{cookie:?}").contains("secret"));
    }

    #[test]
    fn loads_raw_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MUSIC_U=abc; os=pc").unwrap();

        let cookie = Cookie::from_file(file.path()).unwrap();
        assert_eq!(cookie.as_str(), "MUSIC_U=abc; os=pc");
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cookie = \"MUSIC_U=abc\"").unwrap();

        let cookie = Cookie::from_file(file.path()).unwrap();
        assert_eq!(cookie.as_str(), "MUSIC_U=abc");
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = Cookie::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
