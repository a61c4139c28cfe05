//! HTTP client with rate limiting and cookie management.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting for catalog API calls
//! * Cookie management for authenticated catalog requests
//! * Consistent timeouts and headers
//!
//! Audio downloads go through the [`Transport`] implementation, which skips
//! the rate limiter: audio is served from CDNs, not from the catalog API.
//!
//! # Example
//!
//! ```rust
//! use meting_dl::http::Client;
//!
//! let client = Client::for_origin(&config, "https://music.163.com/".parse()?)?;
//!
//! // Rate-limited catalog request
//! let response = client.execute(client.get(url)).await?;
//!
//! // Unthrottled audio transfer
//! let response = client.fetch(audio_url).await?;
//! ```

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    cookie::CookieStore,
    header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_LENGTH},
    Method, StatusCode, Url,
};

use crate::{config::Config, error::Result, source::Body};

/// Response of a [`Transport`] request.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    /// The `Content-Length` hint, if the server sent a valid one.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }
}

/// HTTP collaborator used for audio transfers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET request for `url`. Non-success statuses are returned as
    /// a normal response.
    async fn fetch(&self, url: &str) -> Result<Response>;
}

/// HTTP client with built-in rate limiting and cookie support.
pub struct Client {
    /// Unlimited request client for audio transfers.
    pub unlimited: reqwest::Client,

    /// Rate limiter for catalog API calls.
    rate_limiter: DefaultDirectRateLimiter,

    /// Cookie storage for authentication.
    pub cookie_jar: Option<Arc<dyn CookieStore>>,
}

impl Client {
    /// Rolling window for the catalog rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum catalog calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for establishing a connection.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new client with optional cookie storage.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new<C>(config: &Config, cookie_jar: Option<C>) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let cookie_jar = cookie_jar.map(|jar| Arc::new(jar));

        let mut http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        if let Some(ref jar) = cookie_jar {
            http_client = http_client.cookie_provider(Arc::clone(jar));
        }

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
            cookie_jar: cookie_jar.map(|jar| jar as _), // coerce compiler to infer type
        })
    }

    /// Creates a new client without cookie storage.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn without_cookies(config: &Config) -> Result<Self> {
        // Need to specify a type that satisfies the trait bounds.
        Self::new(config, None::<reqwest::cookie::Jar>)
    }

    /// Creates a client that sends the configured cookie, if any, to
    /// `origin` and its subdomains.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn for_origin(config: &Config, origin: &Url) -> Result<Self> {
        let Some(cookie) = &config.cookie else {
            return Self::without_cookies(config);
        };

        let jar = reqwest::cookie::Jar::default();
        let domain = origin.host_str().unwrap_or_default();
        let domain = domain.strip_prefix("www.").unwrap_or(domain);

        for (name, value) in cookie.pairs() {
            jar.add_cookie_str(&format!("{name}={value}; Domain={domain}; Path=/"), origin);
        }

        Self::new(config, Some(jar))
    }

    /// Builds a GET request.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(Method::GET, url.into())
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails at the network level.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

#[async_trait]
impl Transport for Client {
    async fn fetch(&self, url: &str) -> Result<Response> {
        let url = url.parse::<Url>()?;
        let response = self.unlimited.get(url).send().await?;

        Ok(Response {
            status: response.status(),
            headers: response.headers().clone(),
            body: Body::from(response),
        })
    }
}
