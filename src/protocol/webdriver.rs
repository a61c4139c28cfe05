//! W3C WebDriver client driving the login browser.
//!
//! Talks to an already running driver such as `chromedriver`. One
//! [`WebDriver`] owns one browser session, created on [`WebDriver::connect`]
//! and deleted on [`Automation::close`].
//!
//! # Wire Format
//!
//! Every reply wraps its payload in a `value` member:
//!
//! ```json
//! { "value": { "sessionId": "...", "capabilities": { ... } } }
//! ```
//!
//! Failures carry an error code and message instead:
//!
//! ```json
//! { "value": { "error": "no such window", "message": "..." } }
//! ```
//!
//! WebDriver has no closure events. They are derived by probing the current
//! window handle: `no such window` means the page was closed, an invalid
//! session or an unreachable driver means the whole browser went away.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    capture::{Automation, CookieRecord},
    config::Config,
    error::{Error, ErrorKind, Result},
    http::Client as HttpClient,
};

use super::json;

/// Address `chromedriver` listens on by default.
pub const DEFAULT_URL: &str = "http://localhost:9515";

/// Error reported by the driver.
#[derive(Clone, Debug, Deserialize, Error, PartialEq, Eq)]
#[error("{error}: {message}")]
pub struct DriverError {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

impl DriverError {
    fn kind(&self) -> ErrorKind {
        match self.error.as_str() {
            "invalid argument" => ErrorKind::InvalidArgument,
            "timeout" | "script timeout" => ErrorKind::DeadlineExceeded,
            "no such window" | "invalid session id" => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Self::new(e.kind(), e)
    }
}

#[derive(Debug, Deserialize)]
struct Reply<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WireCookie {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: Option<String>,
}

impl From<WireCookie> for CookieRecord {
    fn from(cookie: WireCookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
        }
    }
}

/// Outcome of probing the browser for liveness.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Probe {
    Open,
    PageClosed,
    ContextClosed,
}

pub struct WebDriver {
    http_client: reqwest::Client,
    session_url: Url,
}

impl WebDriver {
    /// Time between two liveness probes.
    const PROBE_INTERVAL: Duration = Duration::from_millis(500);

    /// Starts a new browser session.
    ///
    /// The browser reports navigation as complete once the initial document
    /// has been parsed, without waiting for subresources.
    ///
    /// # Errors
    ///
    /// * `Unavailable` when the driver cannot be reached
    /// * Any error the driver reports while creating the session
    pub async fn connect(config: &Config, driver_url: &Url, headless: bool) -> Result<Self> {
        let http_client = HttpClient::without_cookies(config)?.unlimited;

        // `Url::join` replaces the last segment unless the path ends in `/`.
        let mut base = driver_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut args = vec!["--no-first-run", "--no-default-browser-check"];
        if headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "eager",
                    "goog:chromeOptions": { "args": args },
                }
            }
        });

        let url = base.join("session")?;
        let session: NewSession = send(&http_client, Method::POST, url, Some(capabilities))
            .await
            .map_err(|e| match e.kind {
                ErrorKind::Catalog => Error::unavailable(format!(
                    "cannot reach webdriver at {driver_url}, is chromedriver running? ({e})"
                )),
                _ => e,
            })?;
        debug!("started webdriver session {}", session.session_id);

        let session_url = base.join(&format!("session/{}/", session.session_id))?;
        Ok(Self {
            http_client,
            session_url,
        })
    }

    async fn command<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + Debug,
    {
        let url = self.session_url.join(path)?;
        send(&self.http_client, method, url, body).await
    }

    async fn probe(&self) -> Probe {
        match self.command::<Value>(Method::GET, "window", None).await {
            Ok(_) => Probe::Open,
            Err(e) => match e.downcast::<DriverError>() {
                Some(driver) if driver.error == "no such window" => Probe::PageClosed,
                Some(driver) if driver.error == "invalid session id" => Probe::ContextClosed,
                Some(_) => Probe::Open,
                // Connection failures: the driver went away with the browser.
                None => Probe::ContextClosed,
            },
        }
    }

    async fn wait_for(&self, wanted: Probe) {
        loop {
            if self.probe().await == wanted {
                return;
            }
            tokio::time::sleep(Self::PROBE_INTERVAL).await;
        }
    }
}

/// Sends one command and unwraps the `value` of its reply.
async fn send<T>(client: &reqwest::Client, method: Method, url: Url, body: Option<Value>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let origin = format!("{method} {}", url.path());
    let is_post = method == Method::POST;
    let mut request = client.request(method, url);
    // POST commands need a body even when they take no parameters.
    if is_post {
        request = request.json(&body.unwrap_or_else(|| json!({})));
    }

    let response = request.send().await.map_err(Error::catalog)?;
    let status = response.status();
    let text = response.text().await.map_err(Error::catalog)?;

    if status.is_success() {
        return json::<Reply<T>>(&text, &origin).map(|reply| reply.value);
    }

    match json::<Reply<DriverError>>(&text, &origin) {
        Ok(reply) => Err(reply.value.into()),
        Err(_) => Err(Error::internal(format!(
            "webdriver answered {}",
            status.canonical_reason().unwrap_or(status.as_str())
        ))),
    }
}

#[async_trait]
impl Automation for WebDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.command::<Value>(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies: Vec<WireCookie> = self.command(Method::GET, "cookie", None).await?;
        Ok(cookies.into_iter().map(Into::into).collect())
    }

    async fn page_closed(&self) {
        self.wait_for(Probe::PageClosed).await;
    }

    async fn context_closed(&self) {
        self.wait_for(Probe::ContextClosed).await;
    }

    async fn close(&self) {
        let url = self.session_url.as_str().trim_end_matches('/');
        let Ok(url) = url.parse::<Url>() else {
            return;
        };

        match self.http_client.delete(url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!("closed webdriver session");
            }
            Ok(response) => debug!("closing webdriver session: {}", response.status()),
            Err(e) => debug!("closing webdriver session: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_map_to_kinds() {
        let reply: Reply<DriverError> = json(
            r#"{"value":{"error":"no such window","message":"target window already closed","stacktrace":""}}"#,
            "test",
        )
        .unwrap();
        let error = Error::from(reply.value);
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert!(error.to_string().contains("target window already closed"));

        let timeout = DriverError {
            error: "timeout".to_owned(),
            message: String::new(),
        };
        assert_eq!(timeout.kind(), ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn cookies_deserialize_from_wire() {
        let reply: Reply<Vec<WireCookie>> = json(
            r#"{"value":[
                {"name":"MUSIC_U","value":"abc","domain":".music.163.com","path":"/","httpOnly":true,"secure":false},
                {"name":"NMTID","value":"x","domain":"music.163.com"}
            ]}"#,
            "test",
        )
        .unwrap();
        let cookies: Vec<CookieRecord> = reply.value.into_iter().map(Into::into).collect();

        assert_eq!(cookies[0].name, "MUSIC_U");
        assert_eq!(cookies[0].path.as_deref(), Some("/"));
        assert_eq!(cookies[1].path, None);
    }

    #[test]
    fn new_session_reply() {
        let reply: Reply<NewSession> = json(
            r#"{"value":{"sessionId":"4f1c","capabilities":{"browserName":"chrome"}}}"#,
            "test",
        )
        .unwrap();
        assert_eq!(reply.value.session_id, "4f1c");
    }
}
