//! Interactive cookie capture.
//!
//! Opens a platform's login page in an automated browser and waits until the
//! operator has logged in, recognized by a set of required cookies showing
//! up in the browser's cookie jar.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> PageLoading -> Polling -> Captured
//!                              \--> TimedOut
//!        (any non-terminal) ------> Cancelled
//! ```
//!
//! The poll loop races against the page and browser closure signals. The
//! first to finish decides the outcome; the others are dropped, which
//! releases their subscriptions.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use veil::Redact;

use crate::{
    config::CookiePlatformConfig,
    error::{Error, ErrorKind, Result},
};

/// A cookie as reported by the browser.
#[derive(Clone, PartialEq, Eq, Hash, Redact, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    #[redact]
    pub value: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Browser automation collaborator.
///
/// All methods take `&self` so that closure signals can be awaited while
/// cookies are being polled.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Navigates to `url`, returning once the initial document has loaded.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Reads all cookies of the browsing context.
    async fn cookies(&self) -> Result<Vec<CookieRecord>>;

    /// Completes when the page is closed. Never completes otherwise.
    async fn page_closed(&self);

    /// Completes when the browsing context is closed. Never completes
    /// otherwise.
    async fn context_closed(&self);

    /// Ends the automation session. Errors are ignored.
    async fn close(&self);
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Idle,
    PageLoading,
    Polling,
    Captured,
    TimedOut,
    Cancelled,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Idle => "idle",
            State::PageLoading => "page loading",
            State::Polling => "polling",
            State::Captured => "captured",
            State::TimedOut => "timed out",
            State::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One capture attempt against a single browser session.
pub struct Session<'a, A: ?Sized> {
    automation: &'a A,
    platform: CookiePlatformConfig,
    timeout: Duration,
    poll_interval: Duration,
    state: State,
}

impl<'a, A> Session<'a, A>
where
    A: Automation + ?Sized,
{
    /// Time between two cookie checks.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    #[must_use]
    pub fn new(automation: &'a A, platform: CookiePlatformConfig, timeout: Duration) -> Self {
        Self {
            automation,
            platform,
            timeout,
            poll_interval: Self::POLL_INTERVAL,
            state: State::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Runs the capture to a terminal state and closes the browser.
    ///
    /// Cookies are checked right after the login page loaded and then every
    /// [`Self::POLL_INTERVAL`]. The last wait is shortened so that the final
    /// check happens exactly at the deadline. A timeout too large to be
    /// represented means no deadline.
    ///
    /// # Errors
    ///
    /// * `Cancelled` when the page or browser is closed before the login
    ///   completed
    /// * `DeadlineExceeded` when the login did not complete in time
    /// * Any error from navigating or reading cookies
    pub async fn run(&mut self) -> Result<Vec<CookieRecord>> {
        let automation = self.automation;
        let platform = self.platform;
        let timeout = self.timeout;
        let poll_interval = self.poll_interval;
        let state = &mut self.state;

        let result = tokio::select! {
            () = automation.page_closed() => {
                Err(Error::cancelled("login page was closed before cookies were captured"))
            }
            () = automation.context_closed() => {
                Err(Error::cancelled("browser was closed before cookies were captured"))
            }
            result = login(automation, &platform, timeout, poll_interval, state) => result,
        };

        // Other failures leave the session in the state they occurred in.
        match result.as_ref().map_err(|e| e.kind) {
            Ok(_) => self.state = State::Captured,
            Err(ErrorKind::DeadlineExceeded) => self.state = State::TimedOut,
            Err(ErrorKind::Cancelled) => self.state = State::Cancelled,
            Err(_) => {}
        }
        debug!("capture session {}", self.state);

        self.automation.close().await;
        result
    }
}

async fn login<A>(
    automation: &A,
    platform: &CookiePlatformConfig,
    timeout: Duration,
    poll_interval: Duration,
    state: &mut State,
) -> Result<Vec<CookieRecord>>
where
    A: Automation + ?Sized,
{
    *state = State::PageLoading;
    info!("loading login page {}", platform.login_url);
    automation.navigate(platform.login_url).await?;

    *state = State::Polling;
    info!("waiting up to {}s for a successful login", timeout.as_secs());
    let deadline = Instant::now().checked_add(timeout);

    loop {
        let cookies = filter_by_domain(automation.cookies().await?, platform.domain_suffix);
        if !cookies.is_empty() && has_required(&cookies, platform.required_cookie_names) {
            info!("login detected");
            return Ok(cookies);
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::deadline_exceeded(
                        "login timeout, try increasing --timeout",
                    ));
                }
                poll_interval.min(deadline - now)
            }
            None => poll_interval,
        };

        debug!("still waiting for login cookies");
        time::sleep(wait).await;
    }
}

/// Keeps the cookies whose domain ends with `suffix`, ignoring case.
#[must_use]
pub fn filter_by_domain(cookies: Vec<CookieRecord>, suffix: &str) -> Vec<CookieRecord> {
    let suffix = suffix.to_lowercase();
    cookies
        .into_iter()
        .filter(|cookie| cookie.domain.to_lowercase().ends_with(&suffix))
        .collect()
}

/// Whether every required name is among the cookie names, ignoring case.
#[must_use]
pub fn has_required(cookies: &[CookieRecord], required: &[&str]) -> bool {
    required.iter().all(|name| {
        cookies
            .iter()
            .any(|cookie| cookie.name.eq_ignore_ascii_case(name))
    })
}

/// Output format of captured cookies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CookieFormat {
    /// `name=value; name=value`, ready for a `Cookie` header.
    #[default]
    Header,
    /// Pretty-printed array of cookie records.
    Json,
}

impl FromStr for CookieFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "header" => Ok(CookieFormat::Header),
            "json" => Ok(CookieFormat::Json),
            other => Err(Error::invalid_argument(format!(
                "unknown cookie format: {other} (expected header or json)"
            ))),
        }
    }
}

impl fmt::Display for CookieFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieFormat::Header => write!(f, "header"),
            CookieFormat::Json => write!(f, "json"),
        }
    }
}

/// Serializes captured cookies.
///
/// # Errors
///
/// Returns `EmptyCapture` when `cookies` is empty.
pub fn format_cookies(cookies: &[CookieRecord], format: CookieFormat) -> Result<String> {
    if cookies.is_empty() {
        return Err(Error::empty_capture(
            "no cookies were captured, make sure you are logged in",
        ));
    }

    match format {
        CookieFormat::Header => Ok(cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")),
        CookieFormat::Json => serde_json::to_string_pretty(cookies).map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{config::Platform, cookie::Cookie};

    fn record(name: &str, value: &str, domain: &str) -> CookieRecord {
        CookieRecord {
            name: name.to_owned(),
            value: value.to_owned(),
            domain: domain.to_owned(),
            path: Some("/".to_owned()),
        }
    }

    /// Decrements the listener count when a closure future is dropped.
    struct Listener(Arc<AtomicUsize>);

    impl Listener {
        fn new(count: &Arc<AtomicUsize>) -> Self {
            count.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(count))
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Browser whose login and closure happen at fixed points in time.
    struct FakeBrowser {
        started: Instant,
        login_after: Option<Duration>,
        page_close_after: Option<Duration>,
        context_close_after: Option<Duration>,
        listeners: Arc<AtomicUsize>,
        polls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FakeBrowser {
        fn new() -> Self {
            Self {
                started: Instant::now(),
                login_after: None,
                page_close_after: None,
                context_close_after: None,
                listeners: Arc::new(AtomicUsize::new(0)),
                polls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }

        async fn closed_after(&self, after: Option<Duration>) {
            let _listener = Listener::new(&self.listeners);
            match after {
                Some(after) => time::sleep_until(self.started + after).await,
                None => std::future::pending::<()>().await,
            }
        }
    }

    #[async_trait]
    impl Automation for FakeBrowser {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn cookies(&self) -> Result<Vec<CookieRecord>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut cookies = vec![
                record("NMTID", "anon", ".music.163.com"),
                record("MUSIC_U", "tracker", ".example.com"),
            ];
            if self
                .login_after
                .is_some_and(|after| self.started.elapsed() >= after)
            {
                cookies.push(record("music_u", "secret", ".163.com"));
            }
            Ok(cookies)
        }

        async fn page_closed(&self) {
            self.closed_after(self.page_close_after).await;
        }

        async fn context_closed(&self) {
            self.closed_after(self.context_close_after).await;
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn netease() -> CookiePlatformConfig {
        Platform::Netease.cookie_config()
    }

    #[tokio::test(start_paused = true)]
    async fn login_before_closure_is_captured() {
        let mut browser = FakeBrowser::new();
        browser.login_after = Some(Duration::from_secs(3));
        browser.page_close_after = Some(Duration::from_secs(10));

        let mut session = Session::new(&browser, netease(), Duration::from_secs(60));
        let cookies = session.run().await.unwrap();

        assert_eq!(session.state(), State::Captured);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.domain.ends_with(".163.com")));
        assert_eq!(browser.polls.load(Ordering::SeqCst), 3);
        assert_eq!(browser.listeners.load(Ordering::SeqCst), 0);
        assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closure_before_login_is_cancelled() {
        let mut browser = FakeBrowser::new();
        browser.login_after = Some(Duration::from_secs(10));
        browser.page_close_after = Some(Duration::from_secs(3));

        let mut session = Session::new(&browser, netease(), Duration::from_secs(60));
        let error = session.run().await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(session.state(), State::Cancelled);
        assert_eq!(browser.listeners.load(Ordering::SeqCst), 0);
        assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn context_closure_cancels_too() {
        let mut browser = FakeBrowser::new();
        browser.context_close_after = Some(Duration::from_secs(1));

        let mut session = Session::new(&browser, netease(), Duration::from_secs(60));
        let error = session.run().await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(browser.listeners.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_login_times_out() {
        let browser = FakeBrowser::new();

        let mut session = Session::new(&browser, netease(), Duration::from_secs(5));
        let error = session.run().await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
        assert!(error.to_string().contains("--timeout"));
        assert_eq!(session.state(), State::TimedOut);
        // Polls at 0s, 2s, 4s and at the deadline.
        assert_eq!(browser.polls.load(Ordering::SeqCst), 4);
        assert_eq!(browser.listeners.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_keeps_polling() {
        let mut browser = FakeBrowser::new();
        browser.login_after = Some(Duration::from_secs(5));

        let mut session = Session::new(&browser, netease(), Duration::from_secs(u64::MAX));
        let cookies = session.run().await.unwrap();

        assert_eq!(session.state(), State::Captured);
        assert_eq!(cookies.len(), 2);
        // Polls at 0s, 2s, 4s and 6s.
        assert_eq!(browser.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn no_required_names_accepts_any_matching_cookie() {
        let browser = FakeBrowser::new();
        let platform = CookiePlatformConfig {
            domain_suffix: ".music.163.com",
            required_cookie_names: &[],
            ..netease()
        };

        let mut session = Session::new(&browser, platform, Duration::ZERO);
        let cookies = session.run().await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "NMTID");
    }

    #[test]
    fn domain_filter_ignores_case() {
        let cookies = vec![
            record("a", "1", ".Music.163.COM"),
            record("b", "2", "163.com.evil.net"),
        ];
        let kept = filter_by_domain(cookies, ".163.com");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "a");
    }

    #[test]
    fn required_names_are_a_subset() {
        let cookies = vec![record("MUSIC_U", "1", ".163.com"), record("__csrf", "2", ".163.com")];
        assert!(has_required(&cookies, &["music_u"]));
        assert!(has_required(&cookies, &[]));
        assert!(!has_required(&cookies, &["MUSIC_U", "BDUSS"]));
    }

    #[test]
    fn header_format_parses_back() {
        let cookies = vec![record("MUSIC_U", "abc", ".163.com"), record("os", "pc", ".163.com")];
        let header = format_cookies(&cookies, CookieFormat::Header).unwrap();
        assert_eq!(header, "MUSIC_U=abc; os=pc");

        let cookie: Cookie = header.parse().unwrap();
        let pairs: Vec<_> = cookie.pairs().collect();
        assert_eq!(pairs, vec![("MUSIC_U", "abc"), ("os", "pc")]);
    }

    #[test]
    fn json_format_round_trips() {
        let mut cookies = vec![record("MUSIC_U", "abc", ".163.com")];
        cookies[0].path = None;
        let json = format_cookies(&cookies, CookieFormat::Json).unwrap();
        assert!(json.contains('\n'));

        let parsed: Vec<CookieRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cookies);
    }

    #[test]
    fn empty_capture_is_an_error() {
        let error = format_cookies(&[], CookieFormat::Header).unwrap_err();
        assert_eq!(error.kind, ErrorKind::EmptyCapture);
    }

    #[test]
    fn values_are_redacted() {
        let debug = format!("{:?}", record("MUSIC_U", "secret", ".163.com"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("MUSIC_U"));
    }
}
