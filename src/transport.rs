//! HTTP transport capability
//!
//! The registry client, poller and downloader never talk to reqwest directly. They hand an
//! [`HttpRequest`] to a [`Transport`] and get back an [`HttpResponse`] whose body is a
//! stream of chunks. [`ReqwestTransport`] is the production variant;
//! [`QueueTransport`](crate::testing::QueueTransport) replays canned responses in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use url::Url;

/// Outbound request
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL including query
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
}

impl HttpRequest {
    /// Request without headers
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Add a header, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Streamed response body
pub struct ResponseBody {
    inner: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl ResponseBody {
    /// Body made of a single chunk
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![bytes.into()])
    }

    /// Body delivered as the given chunks, in order
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::from_stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Body backed by an arbitrary chunk stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Empty body
    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    /// Next chunk, or `None` once the body is exhausted
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.inner.next().await
    }

    /// Read the remaining body into memory
    pub async fn bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }

    /// Read the remaining body as (lossy) UTF-8
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

/// Inbound response
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Body stream
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Response with the given status and body and no headers
    pub fn new(status: StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Parsed `Content-Length` header, `None` if absent or not a number
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// Sends a request and returns the response or a transport error
///
/// Non-2xx statuses are responses, not errors: interpreting them is the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response head with a streamed body
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client with the given connect timeout
    ///
    /// No total timeout is set: the artifact body may take arbitrarily long to stream.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = ResponseBody::from_stream(response
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string())));

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_chunks_are_concatenated() {
        let body = ResponseBody::from_chunks(vec![Bytes::from("foo"), Bytes::from("bar")]);
        assert_eq!(body.text().await.unwrap(), "foobar");
    }

    #[tokio::test]
    async fn body_error_surfaces() {
        let body = ResponseBody::from_stream(stream::iter(vec![
            Ok(Bytes::from("foo")),
            Err(TransportError::Body("reset".into())),
        ]));
        assert!(matches!(body.bytes().await, Err(TransportError::Body(_))));
    }

    #[test]
    fn content_length_parses_header() {
        let mut response = HttpResponse::new(StatusCode::OK, ResponseBody::empty());
        assert_eq!(response.content_length(), None);

        response
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("6"));
        assert_eq!(response.content_length(), Some(6));

        response
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("six"));
        assert_eq!(response.content_length(), None);
    }
}
