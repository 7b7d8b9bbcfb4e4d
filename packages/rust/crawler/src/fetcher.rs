//! HTTP fetching for a single work item.
//!
//! One [`Fetcher`] is built per run and shared by every worker. It owns the
//! `reqwest` client, applies the per-request timeout, retries transport
//! failures with exponential backoff, and turns the response into an
//! [`Outcome`]. It never fails as a whole: every problem becomes a failure
//! outcome for the item at hand.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use pagetitles_shared::{FailureKind, FetchConfig, Outcome, PageTitlesError, Result};

use crate::extract::extract_title;

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("pagetitles/", env!("CARGO_PKG_VERSION"));

/// Largest backoff exponent, so the multiplier cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

// ---------------------------------------------------------------------------
// FetchedPage
// ---------------------------------------------------------------------------

/// A response body retrieved from a URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    /// HTTP status code. Never checked, only logged.
    pub status: u16,
    /// Decoded body text.
    pub body: String,
    /// Number of attempts it took (1 without retries).
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Shared HTTP fetcher for title extraction.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let user_agent = config.user_agent.as_deref().unwrap_or(USER_AGENT);

        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PageTitlesError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Fetch `url` and extract its title. Never returns an error: transport
    /// problems become [`FailureKind::Fetch`], a missing title becomes
    /// [`FailureKind::Parse`].
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_title(&self, url: &str) -> Outcome {
        let result = match self.fetch_page(url).await {
            Ok(page) => {
                debug!(
                    final_url = %page.final_url,
                    status = page.status,
                    attempts = page.attempts,
                    "page received"
                );
                extract_title(&page.body)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(title) => {
                debug!(title = %title, "title extracted");
                Outcome::Title(title)
            }
            Err(e) => {
                let kind = e.failure_kind().unwrap_or(FailureKind::Fetch);
                warn!(kind = %kind, error = %e, "item failed");
                Outcome::Failed {
                    kind,
                    detail: e.detail(),
                }
            }
        }
    }

    /// GET `url`, retrying transport failures up to the configured count.
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        let parsed = Url::parse(url)
            .map_err(|e| PageTitlesError::Network(format!("invalid URL: {e}")))?;

        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(&parsed).await {
                Ok(mut page) => {
                    page.attempts = attempt + 1;
                    return Ok(page);
                }
                Err(e) if attempt < self.config.retries => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries = self.config.retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transport failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delay before retry number `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.config.backoff_ms.saturating_mul(factor))
    }

    /// A single GET with no retry. Any status code is accepted.
    async fn fetch_once(&self, url: &Url) -> Result<FetchedPage> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PageTitlesError::Network(describe(&e, self.config.timeout_secs)))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if let Some(len) = response.content_length() {
            if len > self.config.max_body_bytes {
                return Err(PageTitlesError::Network(format!(
                    "response too large ({len} bytes, max {})",
                    self.config.max_body_bytes
                )));
            }
        }

        let body = response.text().await.map_err(|e| {
            PageTitlesError::Network(format!(
                "body read failed: {}",
                describe(&e, self.config.timeout_secs)
            ))
        })?;

        debug!(status, bytes = body.len(), "page fetched");

        Ok(FetchedPage {
            final_url,
            status,
            body,
            attempts: 1,
        })
    }
}

/// Render a reqwest error with its full cause chain.
fn describe(err: &reqwest::Error, timeout_secs: u64) -> String {
    if err.is_timeout() {
        return format!("timed out after {timeout_secs}s");
    }

    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 1,
            backoff_ms: 10,
            ..FetchConfig::default()
        }
    }

    /// A local port with nothing listening on it.
    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/")
    }

    #[test]
    fn backoff_doubles() {
        let fetcher = Fetcher::new(fast_config()).unwrap();
        assert_eq!(fetcher.backoff(0), Duration::from_millis(10));
        assert_eq!(fetcher.backoff(1), Duration::from_millis(20));
        assert_eq!(fetcher.backoff(3), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn title_from_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><head><title>Hello</title></head><body></body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let outcome = fetcher.fetch_title(&format!("{}/ok", server.uri())).await;
        assert_eq!(outcome, Outcome::Title("Hello".into()));
    }

    #[tokio::test]
    async fn error_status_is_still_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("<title>404 Not Found</title>"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = format!("{}/gone", server.uri());

        let page = fetcher.fetch_page(&url).await.unwrap();
        assert_eq!(page.status, 404);
        assert_eq!(page.attempts, 1);

        let outcome = fetcher.fetch_title(&url).await;
        assert_eq!(outcome, Outcome::Title("404 Not Found".into()));
    }

    #[tokio::test]
    async fn missing_title_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing-title"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body><h1>Hi</h1></body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let outcome = fetcher
            .fetch_title(&format!("{}/missing-title", server.uri()))
            .await;

        match outcome {
            Outcome::Failed { kind, detail } => {
                assert_eq!(kind, FailureKind::Parse);
                assert_eq!(detail, "no title element found");
            }
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_fetch_failure() {
        let fetcher = Fetcher::new(fast_config()).unwrap();
        let outcome = fetcher.fetch_title(&closed_port_url()).await;
        assert!(matches!(
            outcome,
            Outcome::Failed {
                kind: FailureKind::Fetch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_fetch_failure() {
        let fetcher = Fetcher::new(fast_config()).unwrap();
        match fetcher.fetch_title("not a url").await {
            Outcome::Failed { kind, detail } => {
                assert_eq!(kind, FailureKind::Fetch);
                assert!(detail.starts_with("invalid URL"));
            }
            other => panic!("expected fetch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<title>late</title>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        match fetcher.fetch_title(&server.uri()).await {
            Outcome::Failed { kind, detail } => {
                assert_eq!(kind, FailureKind::Fetch);
                assert_eq!(detail, "timed out after 1s");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<title>late</title>")
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let config = FetchConfig {
            retries: 2,
            ..fast_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        let err = fetcher.fetch_page(&server.uri()).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Fetch));
        // `expect(3)` is verified when the server drops.
    }

    #[tokio::test]
    async fn retry_recovers_after_slow_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<title>late</title>")
                    .set_delay(Duration::from_secs(3)),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>On time</title>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = FetchConfig {
            retries: 2,
            ..fast_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let page = fetcher.fetch_page(&server.uri()).await.unwrap();
        assert_eq!(page.attempts, 2);
        assert_eq!(page.final_url, format!("{}/", server.uri()));
        assert_eq!(extract_title(&page.body).unwrap(), "On time");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_body_bytes: 1024,
            ..fast_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        let err = fetcher.fetch_page(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("response too large"));
    }
}
