//! Production transport against a local HTTP server

mod common;

use common::*;
use onesignal_cleaner::registry::{ExportJob, RegistryClient};
use onesignal_cleaner::{
    Cleaner, Error, HttpRequest, RegistryError, ReqwestTransport, Transport, TransportError,
};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXPORT_PATH: &str = "/csv_exports/appId/players.csv.gz";

fn client(server: &MockServer) -> RegistryClient {
    let dir = std::env::temp_dir();
    let config = test_config(&server.uri(), &dir);
    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    RegistryClient::new(
        ExportJob::new(&config.registry).unwrap(),
        Arc::new(transport),
    )
}

#[tokio::test]
async fn export_request_reaches_the_registry() {
    let server = MockServer::start().await;
    let artifact = format!("{}{EXPORT_PATH}", server.uri());
    Mock::given(method("POST"))
        .and(path("/api/v1/players/csv_export"))
        .and(query_param("app_id", APP_ID))
        .and(header("authorization", "Basic restApiKey"))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "csv_file_url": artifact })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = client(&server).request_export().await.unwrap();
    assert_eq!(url.as_str(), artifact);
}

#[tokio::test]
async fn registry_rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/players/csv_export"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"errors":["bad app"]}"#))
        .mount(&server)
        .await;

    match client(&server).request_export().await.unwrap_err() {
        Error::Registry(RegistryError::ExportRequestFailed { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("bad app"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn download_response_carries_content_length() {
    let server = MockServer::start().await;
    let body = export_body(&[("a", LONG_INACTIVE)]);
    Mock::given(method("GET"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    let url = Url::parse(&format!("{}{EXPORT_PATH}", server.uri())).unwrap();
    let response = transport
        .send(HttpRequest::new(Method::GET, url))
        .await
        .unwrap();

    assert_eq!(response.status, reqwest::StatusCode::OK);
    assert_eq!(response.content_length(), Some(body.len() as u64));
    assert_eq!(response.body.bytes().await.unwrap(), body);
}

#[tokio::test]
async fn truncated_body_is_a_body_error() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // A server that promises 100 bytes, sends 10 and hangs up
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    let url = Url::parse(&format!("http://{addr}/players.csv.gz")).unwrap();
    let response = transport
        .send(HttpRequest::new(Method::GET, url))
        .await
        .unwrap();
    assert_eq!(response.content_length(), Some(100));

    let err = response.body.bytes().await.unwrap_err();
    assert!(matches!(err, TransportError::Body(_)), "unexpected error: {err}");
    assert!(!err.is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_transient() {
    // Bind and drop a listener to get a port nothing listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();

    let err = transport
        .send(HttpRequest::new(Method::GET, url))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn full_run_over_http() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = format!("{}{EXPORT_PATH}", server.uri());
    // The production clock is used here, so "active" has to be relative to the real now
    let just_now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

    Mock::given(method("POST"))
        .and(path("/api/v1/players/csv_export"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "csv_file_url": artifact })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EXPORT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(export_body(&[
            ("active-1", just_now.as_str()),
            ("inactive-1", LONG_INACTIVE),
            ("inactive-2", LONG_INACTIVE),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/players/inactive-1"))
        .and(query_param("app_id", APP_ID))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/players/inactive-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.cleanup.concurrency = 2;
    let cleaner = Cleaner::new(config).unwrap();
    let outcome = cleaner.run(&CancellationToken::new()).await.unwrap();

    let summary = outcome.summary.unwrap();
    assert_eq!(summary.records, 3);
    assert_eq!(summary.active, 1);
    assert_eq!(summary.deleted, 2);
    assert!(outcome.artifact.path.exists());
}
