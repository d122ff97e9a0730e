//! Page Fetching
//!
//! The `PageFetcher` capability abstracts the HTTP requester so the
//! sequencing logic is testable without a network. The reqwest-backed
//! [`HttpFetcher`] behind the `http` feature is the production
//! implementation: JSON in, JSON out, one request at a time, explicit
//! timeout.

use thiserror::Error;

#[cfg(feature = "http")]
use std::time::Duration;

/// One raw page response. The engine never looks inside beyond handing it to
/// the caller's `items_returned` and `template` callbacks.
pub type Page = serde_json::Value;

/// A single page request. `body` selects POST over GET.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    pub url: String,
    pub body: Option<Page>,
}

/// Why a page could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("http status {0}")]
    Status(u16),

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body was not valid JSON
    #[error("invalid page payload: {0}")]
    Decode(String),
}

/// HTTP requester capability. Exactly one request is awaited at a time; the
/// engine's loading phase guarantees no overlap per instance.
#[allow(async_fn_in_trait)]
pub trait PageFetcher {
    async fn fetch(&mut self, request: PageRequest) -> Result<Page, FetchError>;
}

// ============================================================================
// HttpFetcher (feature "http")
// ============================================================================

/// reqwest-backed fetcher. GET by default, POST with a JSON body when the
/// request carries one. Every request runs under a timeout so a stalled
/// server surfaces as [`FetchError::Timeout`] instead of wedging the stream.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl PageFetcher for HttpFetcher {
    async fn fetch(&mut self, request: PageRequest) -> Result<Page, FetchError> {
        let builder = match &request.body {
            Some(body) => self.client.post(&request.url).json(body),
            None => self.client.get(&request.url),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
