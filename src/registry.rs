//! OneSignal registry client
//!
//! Builds the two calls the cleaner needs, sends them through the injected
//! [`Transport`] and validates their JSON envelopes:
//!
//! - `POST {origin}/api/v1/players/csv_export?app_id={app}` answers `{"csv_file_url": "..."}`
//! - `DELETE {origin}/api/v1/players/{id}?app_id={app}` answers `{"success": true}`
//!
//! Neither call is retried here. Readiness polling lives in
//! [`AcquisitionPoller`](crate::poller::AcquisitionPoller), deletion retries in the cleaner.

use crate::config::RegistryConfig;
use crate::error::{Error, RegistryError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

const EXPORT_PATH: [&str; 4] = ["api", "v1", "players", "csv_export"];
const PLAYERS_PATH: [&str; 3] = ["api", "v1", "players"];

#[derive(Debug, Deserialize)]
struct ExportEnvelope {
    #[serde(default)]
    csv_file_url: String,
}

#[derive(Debug, Deserialize)]
struct DeleteEnvelope {
    #[serde(default)]
    success: bool,
}

/// Identifies one export attempt: target app, credential and origin
#[derive(Clone)]
pub struct ExportJob {
    /// API origin
    pub origin: Url,
    /// Target app id
    pub app_id: String,
    authorization: HeaderValue,
}

impl ExportJob {
    /// Validate the origin and credential and build the job
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::Config {
            message: format!("invalid origin {:?}: {}", config.origin, e),
            key: Some("registry.origin".to_string()),
        })?;
        let mut authorization = HeaderValue::from_str(&format!("Basic {}", config.api_key))
            .map_err(|_| Error::Config {
                message: "api key contains characters not allowed in a header".to_string(),
                key: Some("registry.api_key".to_string()),
            })?;
        authorization.set_sensitive(true);

        Ok(Self {
            origin,
            app_id: config.app_id.clone(),
            authorization,
        })
    }
}

impl std::fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJob")
            .field("origin", &self.origin.as_str())
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// Client for the export trigger and delete calls
#[derive(Clone)]
pub struct RegistryClient {
    job: ExportJob,
    transport: Arc<dyn Transport>,
}

impl RegistryClient {
    /// Client for `job` sending through `transport`
    pub fn new(job: ExportJob, transport: Arc<dyn Transport>) -> Self {
        Self { job, transport }
    }

    /// The job this client acts for
    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    /// Trigger an export and return the artifact URL
    ///
    /// Anything but a 200 is [`RegistryError::ExportRequestFailed`] carrying status and body.
    /// A 200 without a usable `csv_file_url` is [`RegistryError::MalformedResponse`].
    pub async fn request_export(&self) -> Result<Url> {
        let request = self.request(Method::POST, EXPORT_PATH)?;
        tracing::debug!(url = %request.url, "requesting export");

        let response = self.transport.send(request).await?;
        let (status, body) = read_body(response).await?;
        if status != StatusCode::OK {
            return Err(RegistryError::ExportRequestFailed {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let envelope: ExportEnvelope =
            serde_json::from_str(&body).map_err(|e| RegistryError::MalformedResponse {
                operation: "export",
                reason: format!("{e}: {body}"),
            })?;
        if envelope.csv_file_url.trim().is_empty() {
            return Err(RegistryError::MalformedResponse {
                operation: "export",
                reason: "empty csv_file_url".to_string(),
            }
            .into());
        }

        Url::parse(envelope.csv_file_url.trim()).map_err(|e| {
            RegistryError::MalformedResponse {
                operation: "export",
                reason: format!("invalid csv_file_url {:?}: {e}", envelope.csv_file_url),
            }
            .into()
        })
    }

    /// Delete one subscriber record
    ///
    /// Succeeds only on a 200 whose body has `"success": true`.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let request = self.delete_request(id)?;
        tracing::debug!(id, url = %request.url, "deleting record");

        let response = self.transport.send(request).await?;
        let (status, body) = read_body(response).await?;
        let confirmed = status == StatusCode::OK
            && serde_json::from_str::<DeleteEnvelope>(&body)
                .map(|envelope| envelope.success)
                .unwrap_or(false);

        if confirmed {
            Ok(())
        } else {
            Err(RegistryError::DeletionFailed {
                id: id.to_string(),
                status: status.as_u16(),
                body,
            }
            .into())
        }
    }

    fn delete_request(&self, id: &str) -> Result<HttpRequest> {
        self.request(Method::DELETE, PLAYERS_PATH.into_iter().chain([id]))
    }

    /// Segments are appended to the origin's own path, so a proxy prefix survives
    fn request<'a>(
        &self,
        method: Method,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<HttpRequest> {
        let mut url = self.job.origin.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config {
                message: "origin cannot be a base URL".to_string(),
                key: Some("registry.origin".to_string()),
            })?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("app_id", &self.job.app_id);

        Ok(HttpRequest::new(method, url)
            .with_header(AUTHORIZATION, self.job.authorization.clone())
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json")))
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

async fn read_body(response: HttpResponse) -> Result<(StatusCode, String)> {
    let status = response.status;
    let body = response.body.text().await?;
    Ok((status, body))
}
