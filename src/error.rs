//! Error handling for meting-dl.
//!
//! Every fallible operation returns [`Result`], whose error carries an
//! [`ErrorKind`] describing *where* in the pipeline things went wrong and a
//! boxed underlying error with the details.
//!
//! # Error Categories
//!
//! * Operator input (`InvalidArgument`): fatal, reported before any work starts
//! * Per-track failures (`NotFound`, `Unavailable`, `DataLoss`, `FileSystem`):
//!   isolated by the download planner, never fatal to a batch
//! * Capture failures (`EmptyCapture`, `DeadlineExceeded`, `Cancelled`):
//!   fatal to the cookie capture operation
//! * Catalog failures (`Catalog`): a page or album fetch failed; propagated
//!   to the top level
//!
//! # Example
//!
//! ```rust
//! use meting_dl::error::{Error, ErrorKind, Result};
//!
//! fn resolve(url: Option<&str>) -> Result<&str> {
//!     url.ok_or_else(|| Error::not_found("audio url not available"))
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Used to recover the [`HttpStatus`] of a failed transfer:
    ///
    /// ```rust
    /// if let Some(HttpStatus(status)) = error.downcast::<HttpStatus>() {
    ///     println!("server answered {status}");
    /// }
    /// ```
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether this error belongs to a single track and should not abort a
    /// download batch.
    #[must_use]
    pub fn is_per_track(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotFound | ErrorKind::Unavailable | ErrorKind::DataLoss | ErrorKind::FileSystem
        )
    }
}

/// Standard result type for meting-dl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Malformed operator input.
    #[error("invalid argument")]
    InvalidArgument,

    /// The catalog returned no playable URL for a track.
    #[error("not found")]
    NotFound,

    /// The audio server answered with a non-success status.
    #[error("transfer failed")]
    Unavailable,

    /// The response body broke off while it was being received.
    #[error("data loss")]
    DataLoss,

    /// The destination file could not be created or written.
    #[error("file system error")]
    FileSystem,

    /// The catalog could not be queried.
    #[error("catalog error")]
    Catalog,

    /// Login completed without yielding any cookies.
    #[error("no cookies captured")]
    EmptyCapture,

    /// A deadline elapsed.
    #[error("operation timed out")]
    DeadlineExceeded,

    /// The operation was cancelled from outside.
    #[error("operation was cancelled")]
    Cancelled,

    /// An invariant was violated.
    #[error("internal error")]
    Internal,

    #[error("unknown error")]
    Unknown,
}

/// HTTP status of a failed transfer, carried as the error details of an
/// [`ErrorKind::Unavailable`] error.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("HTTP {0}")]
pub struct HttpStatus(pub http::StatusCode);

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for malformed operator input.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for a track without playable URL.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for an unusable transfer response.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates a transfer error carrying the HTTP status code.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::http_status(http::StatusCode::FORBIDDEN);
    /// assert_eq!(err.to_string(), "transfer failed: HTTP 403 Forbidden");
    /// ```
    #[must_use]
    pub fn http_status(status: http::StatusCode) -> Self {
        Self::new(ErrorKind::Unavailable, HttpStatus(status))
    }

    /// Creates an error for a body that broke off mid-transfer.
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DataLoss, error)
    }

    /// Creates an error for sink or file failures.
    pub fn file_system<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FileSystem, error)
    }

    /// Creates an error for failed catalog queries.
    pub fn catalog<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Catalog, error)
    }

    /// Creates an error for a capture that yielded nothing.
    pub fn empty_capture<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::EmptyCapture, error)
    }

    /// Creates an error for operations that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for cancelled operations.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error for unknown errors.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Most IO in this crate is file IO, so IO errors default to `FileSystem`:
/// * `TimedOut` -> `DeadlineExceeded`
/// * `Interrupted` -> `Cancelled`
/// * `UnexpectedEof` -> `DataLoss`
/// * `InvalidInput` | `InvalidData` -> `InvalidArgument`
/// * everything else -> `FileSystem`
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            TimedOut => Self::deadline_exceeded(err),
            Interrupted => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::file_system(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Body and decode errors -> `DataLoss`
/// * Builder errors -> `Internal`
/// * Status errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * Connect, redirect and everything else -> `Catalog`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_decode() {
            return Self::data_loss(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_status() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::catalog(err)
    }
}

/// Converts JSON errors to `Internal`: payloads from collaborators are
/// parsed leniently, so a JSON error is our own serialization failing.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

/// Converts TOML errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts invalid header errors to `InvalidArgument`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}
