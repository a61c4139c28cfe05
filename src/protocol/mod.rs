//! Wire protocols of the external collaborators.
//!
//! # Submodules
//!
//! * [`netease`] - NetEase Cloud Music catalog adapter
//! * [`webdriver`] - W3C WebDriver client driving the login browser
//!
//! Both speak JSON over HTTP and share the [`json`] helper for parsing
//! with consistent logging.

pub mod netease;
pub mod webdriver;

use std::fmt::Debug;

use serde::Deserialize;

use crate::{
    catalog::Catalog,
    config::{Config, Platform},
    error::{Error, Result},
};

/// Parses and logs a JSON response.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Parse error: logs the raw JSON at TRACE level if it is valid JSON
/// * Invalid JSON: logs the error at DEBUG level and the text at TRACE level
///
/// # Errors
///
/// Returns error if `body` does not deserialize into `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                debug!("{origin}: failed parsing response ({e})");
                trace!("{body}");
            }
            Err(Error::catalog(e))
        }
    }
}

/// Creates the catalog adapter for the configured platform.
///
/// # Errors
///
/// Returns `InvalidArgument` for platforms without a catalog adapter, and
/// any error from building the HTTP client.
pub fn catalog(config: &Config) -> Result<Box<dyn Catalog>> {
    match config.platform {
        Platform::Netease => Ok(Box::new(netease::Netease::new(config)?)),
        other => Err(Error::invalid_argument(format!(
            "downloads from {other} are not supported, use {}",
            Platform::Netease
        ))),
    }
}
