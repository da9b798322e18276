//! Test doubles for the transport capability
//!
//! [`QueueTransport`] answers requests from a FIFO queue of canned replies and records
//! every request it saw, so tests can assert both what was sent and that every queued
//! reply was consumed.

use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, ResponseBody, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One canned reply
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Answer with a response
    Response {
        /// HTTP status
        status: u16,
        /// Response headers
        headers: HeaderMap,
        /// Body, delivered in these chunks
        chunks: Vec<Bytes>,
    },
    /// Fail the send with a transport error
    Failure(String),
}

impl MockReply {
    /// JSON response
    pub fn json(status: u16, body: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::Response {
            status,
            headers,
            chunks: vec![Bytes::copy_from_slice(body.as_bytes())],
        }
    }

    /// Response whose `Content-Length` matches the body
    pub fn download(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::download_declaring(status, body.len() as u64, body)
    }

    /// Response declaring `content_length` regardless of the actual body size
    pub fn download_declaring(status: u16, content_length: u64, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        Self::Response {
            status,
            headers,
            chunks: vec![body.into()],
        }
    }

    /// Bare status with a plain-text body and no headers
    pub fn status(status: u16, body: &str) -> Self {
        Self::Response {
            status,
            headers: HeaderMap::new(),
            chunks: vec![Bytes::copy_from_slice(body.as_bytes())],
        }
    }
}

/// Transport that replays queued replies in order
#[derive(Debug, Default)]
pub struct QueueTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl QueueTransport {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reply
    pub fn enqueue(&self, reply: MockReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Replies not consumed yet
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for QueueTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let description = format!("{} {}", request.method, request.url);
        lock(&self.requests).push(request);

        let reply = lock(&self.replies).pop_front();
        match reply {
            Some(MockReply::Response {
                status,
                headers,
                chunks,
            }) => {
                let status = StatusCode::from_u16(status)
                    .map_err(|e| TransportError::Simulated(e.to_string()))?;
                Ok(HttpResponse {
                    status,
                    headers,
                    body: ResponseBody::from_chunks(chunks),
                })
            }
            Some(MockReply::Failure(message)) => Err(TransportError::Simulated(message)),
            None => Err(TransportError::Simulated(format!(
                "unexpected request: {description}"
            ))),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use url::Url;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new(Method::GET, Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let transport = QueueTransport::new();
        transport
            .enqueue(MockReply::Failure("connection reset".into()))
            .enqueue(MockReply::download(200, "foobar"));

        assert!(transport.send(get("https://a.test/1")).await.is_err());
        let response = transport.send(get("https://a.test/2")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_length(), Some(6));
        assert_eq!(response.body.text().await.unwrap(), "foobar");

        assert_eq!(transport.remaining(), 0);
        let urls: Vec<_> = transport
            .requests()
            .iter()
            .map(|r| r.url.to_string())
            .collect();
        assert_eq!(urls, ["https://a.test/1", "https://a.test/2"]);
    }

    #[tokio::test]
    async fn empty_queue_is_an_error() {
        let transport = QueueTransport::new();
        let err = transport.send(get("https://a.test/x")).await.unwrap_err();
        assert!(err.to_string().contains("unexpected request"));
    }
}
