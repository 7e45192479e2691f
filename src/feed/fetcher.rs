use crate::feed::parser::{parse_rss, FeedDocument};
use futures::StreamExt;
use reqwest::header::USER_AGENT;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

pub const DEFAULT_USER_AGENT: &str = "gator";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching and decoding one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// The caller cancelled the fetch
    #[error("Fetch cancelled")]
    Cancelled,
    /// Feed XML could not be decoded as RSS 2.0
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Fetches a feed URL and decodes it into a [`FeedDocument`].
///
/// One GET per call. Retrying is left to the scheduler, which simply comes
/// back to the feed on a later tick.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_USER_AGENT, DEFAULT_TIMEOUT)
    }
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, user_agent: &str, timeout: Duration) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
            timeout,
        }
    }

    /// Fetch and decode `url`.
    ///
    /// The request is abandoned when `cancel` fires or the timeout elapses,
    /// whichever comes first.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::Timeout`] / [`FetchError::Cancelled`]
    /// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
    /// - [`FetchError::Parse`] - Not a well-formed RSS 2.0 document
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FeedDocument, FetchError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .header(USER_AGENT, self.user_agent.as_str())
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            read_limited_bytes(response, MAX_FEED_SIZE).await
        };

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.timeout, request) => {
                result.map_err(|_| FetchError::Timeout)??
            }
        };

        let document = parse_rss(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(
            feed = %url,
            title = %document.title,
            items = document.items.len(),
            "Fetched feed"
        );
        Ok(document)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test &amp;amp; Feed</title>
    <description>About tests</description>
    <item><title>First</title><link>https://example.com/1</link><pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate></item>
    <item><title>Second</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    fn fetcher_with_timeout(timeout: Duration) -> FeedFetcher {
        FeedFetcher::new(reqwest::Client::new(), DEFAULT_USER_AGENT, timeout)
    }

    #[tokio::test]
    async fn test_fetch_success_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("User-Agent", "gator"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let doc = FeedFetcher::default()
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(doc.title, "Test & Feed");
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.items[0].pub_date, "Mon, 02 Jan 2006 15:04:05 -0700");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = FeedFetcher::default()
            .fetch(&mock_server.uri(), &CancellationToken::new())
            .await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = FeedFetcher::default()
            .fetch(&mock_server.uri(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let result = FeedFetcher::default()
            .fetch(&mock_server.uri(), &CancellationToken::new())
            .await;
        match result {
            Err(FetchError::Parse(_)) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let result = fetcher_with_timeout(Duration::from_millis(100))
            .fetch(&mock_server.uri(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_cancelled_mid_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = FeedFetcher::default()
            .fetch(&mock_server.uri(), &cancel)
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a".repeat(MAX_FEED_SIZE + 1)))
            .mount(&mock_server)
            .await;

        let result = FeedFetcher::default()
            .fetch(&mock_server.uri(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let result = FeedFetcher::default()
            .fetch("http://127.0.0.1:1/feed", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
