//! Network transport abstraction.
//!
//! [`Transport`] is the seam between the transfer machinery and the network:
//! one GET that yields a byte stream, plus an optional length probe. The
//! production implementation is [`ReqwestTransport`]; tests substitute an
//! in-memory implementation.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tracing::debug;

use crate::config::TransferConfig;
use crate::error::{SyncError, SyncResult};
use crate::task::BoxFuture;

/// Stream of body chunks.
pub type ByteStream = BoxStream<'static, SyncResult<Bytes>>;

/// An accepted response, body not yet read.
pub struct TransportResponse {
    /// Declared body length, if the server sent one.
    pub content_length: Option<u64>,
    /// The body.
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Performs URL fetches.
///
/// Implementations map every failure (connection, timeout, non-success
/// status) to a transport-class [`SyncError`]. No retries happen here.
pub trait Transport: Send + Sync {
    /// Issue a GET for `url`.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<TransportResponse>>;

    /// Ask for the length of `url` without downloading it.
    ///
    /// Returns `None` when the size cannot be determined.
    fn probe_length<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async { None })
    }
}

/// HTTP(S) transport backed by an async reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport from the transfer settings.
    pub fn new(config: &TransferConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            SyncError::Transport {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<TransportResponse>> {
        Box::pin(async move {
            debug!(url = %url, "GET");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| self.map_error(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SyncError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_length = response.content_length();
            let owned_url = url.to_string();
            let timeout_secs = self.timeout.as_secs();
            let body = response
                .bytes_stream()
                .map(move |chunk| {
                    chunk.map_err(|e| {
                        if e.is_timeout() {
                            SyncError::Timeout {
                                url: owned_url.clone(),
                                timeout_secs,
                            }
                        } else {
                            SyncError::Transport {
                                url: owned_url.clone(),
                                reason: e.to_string(),
                            }
                        }
                    })
                })
                .boxed();

            Ok(TransportResponse {
                content_length,
                body,
            })
        })
    }

    fn probe_length<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<u64>> {
        Box::pin(async move {
            let response = self.client.head(url).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|len| *len > 0)
        })
    }
}
