//! HTTP client with rate limiting and cookie management for Deezer.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to respect Deezer's API quotas
//! * Cookie management for authentication
//! * Consistent timeouts and headers
//!
//! It also defines the [`Transport`] seam through which the download engine
//! reaches the CDN: an availability probe and a ranged fetch. [`Client`]
//! implements it over the unlimited client, since CDN downloads do not
//! count against the API quota.
//!
//! # Rate Limiting
//!
//! Implements Deezer's rate limits:
//! * 50 calls per 5-second interval
//! * Automatic request throttling
//! * Allows bursts up to the maximum calls per interval
//! * Requests that would exceed the limit are delayed
//!
//! # Example
//!
//! ```rust
//! use dzdl::http::{Client, Transport};
//!
//! let client = Client::without_cookies(&config)?;
//!
//! // Rate-limited API requests
//! let request = client.get(url, "");
//! let response = client.execute(request).await?;
//!
//! // Unlimited CDN transfers
//! let probe = client.probe(&cdn_url).await?;
//! ```

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{stream::BoxStream, FutureExt, StreamExt, TryFutureExt, TryStreamExt};
use governor::{DefaultDirectRateLimiter, Quota};
use http::StatusCode;
use reqwest::{
    self,
    cookie::CookieStore,
    header::{HeaderValue, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_RANGE, RANGE},
    Body, Method, Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Outcome of probing a remote asset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Probe {
    /// The asset exists and has this many bytes.
    Available(u64),
    /// The asset is refused (403).
    Forbidden,
    /// The asset is not licensed for this region (451).
    GeoBlocked,
    /// The asset does not exist or is empty (404, 410, zero length).
    Missing,
}

/// Response of a ranged fetch.
pub struct Response {
    pub status: StatusCode,

    /// Length of the body, not of the whole asset.
    pub content_length: Option<u64>,

    pub body: BoxStream<'static, Result<Bytes>>,
}

/// Remote byte source of the download engine.
pub trait Transport: Send + Sync {
    /// Checks whether an asset is available, without downloading it.
    fn probe(&self, url: &Url) -> impl Future<Output = Result<Probe>> + Send;

    /// Fetches an asset from `offset` onwards. Non-success statuses are
    /// returned as a response, not as an error.
    fn fetch(&self, url: &Url, offset: u64) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP client with built-in rate limiting and cookie support.
///
/// Wraps `reqwest::Client` to provide:
/// * Rate limiting for API quotas
/// * Optional cookie storage
/// * Consistent configuration
pub struct Client {
    /// Unlimited request client for CDN transfers.
    ///
    /// Direct access to underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter for API quota compliance.
    ///
    /// Implements Deezer's 50 calls per 5-second limit.
    rate_limiter: DefaultDirectRateLimiter,

    /// Cookie storage for authentication.
    ///
    /// Optional to support both authenticated and public endpoints.
    pub cookie_jar: Option<Arc<dyn CookieStore>>,
}

impl Client {
    /// Standard rate limit interval for Deezer's API.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum allowed API calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// A stalled read surfaces as a transient fault, which the transfer
    /// retries from the last complete window.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client with optional cookie storage.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * HTTP client creation fails
    /// * Rate limit parameters are zero
    pub fn new<C>(config: &Config, cookie_jar: Option<C>) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        // Wrap `cookie_jar` in an `Arc` for asynchronous use.
        let cookie_jar = cookie_jar.map(|jar| Arc::new(jar));

        let mut http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        if let Some(ref jar) = cookie_jar {
            http_client = http_client.cookie_provider(Arc::clone(jar));
        }

        // Rate limit own requests as to not DoS the Deezer infrastructure.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::internal("quota time interval is zero"))?
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .ok_or_else(|| Error::internal("calls per interval is zero"))?,
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
            cookie_jar: cookie_jar.map(|jar| jar as _), // coerce compiler to infer type
        })
    }

    /// Creates a new client with cookie storage, for the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn with_cookies<C>(config: &Config, cookie_jar: C) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        Self::new(config, Some(cookie_jar))
    }

    /// Creates a new client without cookie storage, for the CDN and the
    /// public API.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn without_cookies(config: &Config) -> Result<Self> {
        // Need to specify a type that satisfies the trait bounds.
        Self::new(config, None::<reqwest::cookie::Jar>)
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    pub fn get<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::GET, url, body)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if request execution fails.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Builds a GET request for a byte range, bypassing the rate limiter.
    fn ranged(&self, url: &Url, range: &str) -> Result<reqwest::Request> {
        let mut request = reqwest::Request::new(Method::GET, url.clone());
        request
            .headers_mut()
            .try_insert(RANGE, HeaderValue::from_str(range)?)?;
        Ok(request)
    }
}

/// Reads the total asset size from a `Content-Range: bytes 0-0/1234` header.
fn total_from_content_range(value: &HeaderValue) -> Option<u64> {
    value
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| response.content_length())
}

impl Transport for Client {
    async fn probe(&self, url: &Url) -> Result<Probe> {
        let request = self.ranged(url, "bytes=0-0")?;
        let response = self.unlimited.execute(request).await?;

        let probe = match response.status() {
            StatusCode::FORBIDDEN => Probe::Forbidden,
            StatusCode::NOT_FOUND | StatusCode::GONE => Probe::Missing,
            StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => Probe::GeoBlocked,
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(total_from_content_range)
                .map_or(Probe::Missing, Probe::Available),
            status if status.is_success() => {
                content_length(&response).map_or(Probe::Missing, Probe::Available)
            }
            status => {
                return Err(Error::unavailable(format!("probe of {url} returned {status}")));
            }
        };

        Ok(match probe {
            Probe::Available(0) => Probe::Missing,
            probe => probe,
        })
    }

    async fn fetch(&self, url: &Url, offset: u64) -> Result<Response> {
        let request = if offset > 0 {
            self.ranged(url, &format!("bytes={offset}-"))?
        } else {
            self.get(url.clone(), "")
        };

        let response = self.unlimited.execute(request).await?;
        let status = response.status();
        let content_length = content_length(&response);
        let body = response.bytes_stream().map_err(Error::from).boxed();

        Ok(Response {
            status,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_total_from_content_range() {
        let value = HeaderValue::from_static("bytes 0-0/4817066");
        assert_eq!(total_from_content_range(&value), Some(4_817_066));

        let unknown = HeaderValue::from_static("bytes 0-0/*");
        assert_eq!(total_from_content_range(&unknown), None);
    }
}
