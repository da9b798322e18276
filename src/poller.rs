//! Readiness polling for the asynchronously generated export
//!
//! The registry produces the export in the background and never notifies anyone, so the
//! poller asks again on a fixed pause until the answer is "ready" or the readiness
//! deadline passes:
//!
//! ```text
//! Requesting ──ready──▶ Ready
//!     │  ▲
//!  not ready / transport error / unexpected status
//!     ▼  │
//!   Waiting ──deadline passed──▶ TimedOut
//! ```
//!
//! Transport errors, HTTP 403 and unexpected statuses are all retried. Only a malformed
//! success response or cancellation end the loop early.

use crate::clock::Clock;
use crate::config::AcquisitionConfig;
use crate::error::{Error, RegistryError, Result, TransportError};
use crate::registry::RegistryClient;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::Event;
use reqwest::{Method, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Where a polling loop currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    /// Attempt in flight
    Requesting,
    /// Sleeping before the next attempt
    Waiting,
    /// Resource is available
    Ready,
    /// Deadline passed without a ready answer
    TimedOut,
}

/// Result of a single readiness attempt
#[derive(Debug)]
pub enum Probe<T> {
    /// The resource is available
    Ready(T),
    /// 403: still being generated
    NotReady,
    /// Some other status; logged and retried
    Unexpected {
        /// HTTP status
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },
    /// The request did not complete; logged and retried
    Failed(TransportError),
}

/// Polls the registry until the export (and its artifact) is ready
#[derive(Clone)]
pub struct AcquisitionPoller {
    registry: RegistryClient,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    readiness_timeout: Duration,
    pause: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl AcquisitionPoller {
    /// Poller using the timeout and pause of `config`
    pub fn new(
        registry: RegistryClient,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: &AcquisitionConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            registry,
            transport,
            clock,
            readiness_timeout: config.readiness_timeout,
            pause: config.pause,
            event_tx,
        }
    }

    /// Trigger the export until the registry hands out the artifact URL
    pub async fn acquire_export_url(&self, cancel: &CancellationToken) -> Result<Url> {
        self.event_tx.send(Event::ExportRequested).ok();
        let url = self
            .poll("export url", cancel, move || async move {
                match self.registry.request_export().await {
                    Ok(url) => Ok(Probe::Ready(url)),
                    Err(Error::Transport(e)) => Ok(Probe::Failed(e)),
                    Err(Error::Registry(RegistryError::ExportRequestFailed { status, body })) => {
                        if status == StatusCode::FORBIDDEN.as_u16() {
                            Ok(Probe::NotReady)
                        } else {
                            Ok(Probe::Unexpected { status, body })
                        }
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        self.event_tx
            .send(Event::ExportReady {
                url: url.to_string(),
            })
            .ok();
        Ok(url)
    }

    /// GET the artifact URL until it answers 200 and return that response unread
    ///
    /// The export URL answers 403 while the file is still being written.
    pub async fn await_artifact(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        self.poll(url.as_str(), cancel, move || async move {
            let request = HttpRequest::new(Method::GET, url.clone());
            match self.transport.send(request).await {
                Ok(response) if response.status == StatusCode::OK => Ok(Probe::Ready(response)),
                Ok(response) if response.status == StatusCode::FORBIDDEN => Ok(Probe::NotReady),
                Ok(response) => {
                    let status = response.status.as_u16();
                    let body = response.body.text().await.unwrap_or_default();
                    Ok(Probe::Unexpected { status, body })
                }
                Err(e) => Ok(Probe::Failed(e)),
            }
        })
        .await
    }

    /// Run `probe` until it reports ready, the deadline passes or `cancel` fires
    pub async fn poll<T, F, Fut>(
        &self,
        resource: &str,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let started_at = self.clock.now();
        let deadline = chrono::Duration::from_std(self.readiness_timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout));
        let mut attempt: u32 = 0;
        let mut state = PollState::Requesting;

        tracing::info!(resource, started_at = %started_at, "requesting remote data");

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            tracing::debug!(resource, attempt, state = ?state, "polling attempt");

            match probe().await? {
                Probe::Ready(value) => {
                    state = PollState::Ready;
                    tracing::info!(resource, attempt, state = ?state, "remote data is ready");
                    return Ok(value);
                }
                Probe::NotReady => {
                    tracing::debug!(resource, attempt, "remote data is not ready yet");
                    self.event_tx.send(Event::ExportNotReady { attempt }).ok();
                }
                Probe::Unexpected { status, body } => {
                    tracing::error!(
                        resource,
                        attempt,
                        status,
                        body = %body,
                        "unexpected response while requesting remote data"
                    );
                }
                Probe::Failed(e) => {
                    tracing::error!(
                        resource,
                        attempt,
                        error = %e,
                        "error while requesting remote data"
                    );
                }
            }

            state = PollState::Waiting;
            tracing::debug!(
                resource,
                attempt,
                state = ?state,
                pause_ms = self.pause.as_millis(),
                "sleeping before next attempt"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.clock.sleep(self.pause) => {}
            }

            let now = self.clock.now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                state = PollState::TimedOut;
                tracing::error!(
                    resource,
                    attempts = attempt,
                    started_at = %started_at,
                    now = %now,
                    state = ?state,
                    "readiness timeout while requesting remote data"
                );
                return Err(Error::ReadinessTimeoutExceeded {
                    timeout_secs: self.readiness_timeout.as_secs(),
                    target: resource.to_string(),
                });
            }
            state = PollState::Requesting;
        }
    }
}

impl std::fmt::Debug for AcquisitionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionPoller")
            .field("registry", &self.registry)
            .field("readiness_timeout", &self.readiness_timeout)
            .field("pause", &self.pause)
            .finish_non_exhaustive()
    }
}
