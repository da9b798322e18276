//! Verified streaming download of the export artifact
//!
//! The body is copied chunk by chunk into an [`AsyncWrite`] sink while the received byte
//! count is tracked and published as [`Event::DownloadProgress`]. Once the body ends, the
//! count is compared with the declared `Content-Length`; what a mismatch means is decided
//! by the [`IntegrityPolicy`].

use crate::error::{DownloadError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::Event;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use url::Url;

/// What to do when the written byte count differs from `Content-Length`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IntegrityPolicy {
    /// Fail with [`DownloadError::ShortWrite`]
    #[default]
    Strict,
    /// Log a warning and report success
    Tolerant,
}

impl IntegrityPolicy {
    /// `Strict` for true, `Tolerant` for false
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Tolerant }
    }
}

/// Streams an artifact into a sink and checks its length
#[derive(Clone)]
pub struct VerifiedDownloader {
    transport: Arc<dyn Transport>,
    policy: IntegrityPolicy,
    event_tx: broadcast::Sender<Event>,
}

impl VerifiedDownloader {
    /// Downloader sending through `transport`
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: IntegrityPolicy,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            policy,
            event_tx,
        }
    }

    /// Issue one GET against an already resolved URL and stream it into `sink`
    ///
    /// No readiness polling happens here; use
    /// [`AcquisitionPoller::await_artifact`](crate::poller::AcquisitionPoller::await_artifact)
    /// when the URL may not be ready yet.
    pub async fn download<W>(&self, url: &Url, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self
            .transport
            .send(HttpRequest::new(Method::GET, url.clone()))
            .await?;
        self.write_response(url, response, sink).await
    }

    /// Stream a 200 response body into `sink`, returning the bytes written
    pub async fn write_response<W>(
        &self,
        url: &Url,
        mut response: HttpResponse,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if response.status != StatusCode::OK {
            return Err(DownloadError::UnexpectedStatus {
                status: response.status.as_u16(),
            }
            .into());
        }
        let total = response
            .content_length()
            .ok_or(DownloadError::MissingContentLength)?;

        tracing::info!(url = %url, total, "reading response body into a destination");

        let mut received: u64 = 0;
        while let Some(chunk) = response.body.next_chunk().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            received += chunk.len() as u64;

            tracing::trace!(size = chunk.len(), received, total, "data chunk received");
            self.event_tx
                .send(Event::DownloadProgress { received, total })
                .ok();
        }
        sink.flush().await?;

        if received != total {
            match self.policy {
                IntegrityPolicy::Strict => {
                    tracing::error!(
                        url = %url,
                        written = received,
                        content_length = total,
                        "invalid number of bytes written while downloading"
                    );
                    return Err(DownloadError::ShortWrite {
                        expected: total,
                        written: received,
                    }
                    .into());
                }
                IntegrityPolicy::Tolerant => {
                    tracing::warn!(
                        url = %url,
                        written = received,
                        content_length = total,
                        "invalid number of bytes written while downloading, continuing"
                    );
                    return Ok(received);
                }
            }
        }

        tracing::info!(url = %url, bytes = received, "remote resource has been downloaded");
        Ok(received)
    }
}

impl std::fmt::Debug for VerifiedDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedDownloader")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
