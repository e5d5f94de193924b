//! HTTP client wrapper with retries, timeouts and a persistent cookie jar.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{GfileError, Result};

/// Statuses retried when the force-list is empty, if the server sent `Retry-After`.
const RETRY_AFTER_STATUSES: [u16; 3] = [413, 429, 503];

impl RetryPolicy {
    /// Delay before retry `attempt` (0-based): `backoff_factor * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_factor
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Whether a response with this status should be retried.
    pub fn retries_status(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        let code = status.as_u16();
        if self.status_forcelist.is_empty() {
            RETRY_AFTER_STATUSES.contains(&code) && headers.contains_key(RETRY_AFTER)
        } else {
            self.status_forcelist.contains(&code)
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// HTTP session used for every request of a transfer.
///
/// Cookies set by any response are replayed on later requests made through
/// the same instance; the download page relies on this.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    jar: Arc<Jar>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Self::build(timeout, retry, None)
    }

    /// Create a new HTTP client with a proxy.
    pub fn with_proxy(proxy: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| GfileError::InvalidConfig(format!("Invalid proxy: {}", e)))?;
        Self::build(timeout, retry, Some(proxy))
    }

    fn build(timeout: Duration, retry: RetryPolicy, proxy: Option<reqwest::Proxy>) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        // Only connecting is bounded client-wide. A gated chunk request stays
        // open until earlier chunks are acknowledged.
        let mut builder = Client::builder()
            .cookie_provider(jar.clone())
            .connect_timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| GfileError::InvalidConfig(format!("Failed to build client: {}", e)))?;
        Ok(Self {
            client,
            jar,
            retry,
            timeout,
        })
    }

    /// Send a request built by `build`, rebuilding it for every attempt.
    ///
    /// Connect errors, timeouts and retryable statuses are retried with
    /// exponential backoff. Other non-success statuses become
    /// [`GfileError::HttpError`].
    pub async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if attempt < self.retry.retries
                        && self.retry.retries_status(status, response.headers())
                    {
                        let delay = retry_after(response.headers())
                            .unwrap_or_else(|| self.retry.delay(attempt));
                        warn!(
                            "HTTP {} from {}, retrying in {:?}",
                            status,
                            response.url(),
                            delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(GfileError::HttpError(status.as_u16()));
                    }
                    debug!("HTTP {} {}", status, response.url());
                    return Ok(response);
                }
                Err(e) if attempt < self.retry.retries && (e.is_connect() || e.is_timeout()) => {
                    let delay = self.retry.delay(attempt);
                    warn!("request failed ({}), retrying in {:?}", e, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(GfileError::RequestError(e)),
            }
        }
    }

    /// GET a URL and return the body as text, within the configured timeout.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .send_with_retry(|client| client.get(url).timeout(self.timeout))
            .await?;
        Ok(response.text().await?)
    }

    /// GET a URL, leaving the body unread for streaming.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send_with_retry(|client| client.get(url)).await
    }

    /// POST a body produced fresh for every attempt, leaving the response
    /// body unread.
    pub async fn post<F>(&self, url: &str, headers: HeaderMap, body: F) -> Result<Response>
    where
        F: Fn() -> reqwest::Body,
    {
        self.send_with_retry(|client| client.post(url).headers(headers.clone()).body(body()))
            .await
    }

    /// Cookies the jar would send to `url`, formatted as a `Cookie` header value.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Store a cookie as if `url` had set it.
    pub fn add_cookie(&self, cookie: &str, url: &str) -> Result<()> {
        let url = Url::parse(url).map_err(|_| GfileError::InvalidUrl(url.to_string()))?;
        self.jar.add_cookie_str(cookie, &url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_client_creation() {
        let client = HttpClient::new(Duration::from_secs(10), RetryPolicy::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_proxy_creation() {
        let client = HttpClient::with_proxy(
            "http://127.0.0.1:8080",
            Duration::from_secs(10),
            RetryPolicy::default(),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn test_proxy_invalid() {
        let res = HttpClient::with_proxy(":::::::", Duration::from_secs(1), RetryPolicy::default());
        assert!(res.is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(1600));
    }

    #[test]
    fn test_status_classes() {
        let policy = RetryPolicy::default();
        let empty = HeaderMap::new();
        let mut with_retry_after = HeaderMap::new();
        with_retry_after.insert(RETRY_AFTER, HeaderValue::from_static("3"));

        assert!(!policy.retries_status(StatusCode::SERVICE_UNAVAILABLE, &empty));
        assert!(policy.retries_status(StatusCode::SERVICE_UNAVAILABLE, &with_retry_after));
        assert!(!policy.retries_status(StatusCode::BAD_GATEWAY, &with_retry_after));
        assert_eq!(retry_after(&with_retry_after), Some(Duration::from_secs(3)));

        let forced = RetryPolicy {
            status_forcelist: vec![500, 502, 504],
            ..RetryPolicy::default()
        };
        assert!(forced.retries_status(StatusCode::BAD_GATEWAY, &empty));
        assert!(!forced.retries_status(StatusCode::SERVICE_UNAVAILABLE, &with_retry_after));
    }

    #[test]
    fn test_cookie_jar_round_trip() {
        let client = HttpClient::new(Duration::from_secs(10), RetryPolicy::default()).unwrap();
        assert!(client.cookie_header("https://46.gigafile.nu/abc").is_none());

        client
            .add_cookie("downloadkey=xyz; Domain=gigafile.nu; Path=/", "https://46.gigafile.nu/abc")
            .unwrap();
        let header = client
            .cookie_header("https://46.gigafile.nu/download.php?file=abc")
            .unwrap();
        assert_eq!(header, "downloadkey=xyz");
    }
}
