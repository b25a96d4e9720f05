//! HTTP client used to fetch archived alerts and remote alert resources.
//!
//! The [`HttpFetcher`] trait abstracts the HTTP operations for easier testing
//! with mocks; [`ReqwestFetcher`] is the production implementation.

use std::time::Duration;

use log::{debug, warn};
use mockall::automock;
use reqwest::{Client, StatusCode};
use thiserror::Error;

/// Timeout applied to every request.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors raised while performing an HTTP request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or its body could not be read.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Trait for fetching documents over HTTP.
#[automock]
pub trait HttpFetcher {
    /// Fetches `url`.
    ///
    /// Returns `Ok(Some(body))` on HTTP 200, `Ok(None)` on any other status and
    /// an error when the server cannot be reached.
    async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError>;
}

/// [`HttpFetcher`] backed by a shared [`reqwest::Client`].
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Create a new [ReqwestFetcher].
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build http client with timeout, using defaults: {}", e);
                Client::new()
            });
        ReqwestFetcher { client }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
        debug!("request {}", url);

        let to_error = |source| FetchError::Request {
            url: url.to_owned(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(to_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            debug!("response from {} -> status {}", url, status);
            return Ok(None);
        }

        let body = response.bytes().await.map_err(to_error)?;
        debug!("response from {} -> {} bytes", url, body.len());

        Ok(Some(body.to_vec()))
    }
}
