//! Tests for the reqwest-backed client against a local mock server.
//!
//! The blocking client cannot run on a runtime worker, so every call goes
//! through `spawn_blocking`.

use std::time::Duration;

use mdm_platform::{HttpClient, HttpRequest, ReqwestClient, TransportError};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn client() -> Result<ReqwestClient, TransportError> {
    ReqwestClient::new(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread")]
async fn post_sends_body_and_headers() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/token", server.uri());
    let response = tokio::task::spawn_blocking(move || {
        let request = HttpRequest::post(url, "grant_type=client_credentials")
            .header("Content-Type", "application/x-www-form-urlencoded");
        client()?.execute(&request)
    })
    .await??;

    assert_eq!(response.status, 200);
    let body: serde_json::Value = response.json()?;
    assert_eq!(body["ok"], true);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn error_status_is_a_response() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/iot/config"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/api/iot/config", server.uri());
    let response =
        tokio::task::spawn_blocking(move || client()?.execute(&HttpRequest::get(url))).await??;
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_reads_whole_body_in_chunks() -> TestResult {
    let server = MockServer::start().await;
    let image: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/api/iot/firmware"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/api/iot/firmware", server.uri());
    let (received, complete) = tokio::task::spawn_blocking(move || {
        let mut stream = client()?.open_stream(&HttpRequest::get(url))?;
        let mut received = Vec::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = stream.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            received.extend_from_slice(buf.get(..n).unwrap_or_default());
        }
        Ok::<_, TransportError>((received, stream.is_complete()))
    })
    .await??;

    assert_eq!(received, image);
    assert!(complete);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_rejects_error_status() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let result =
        tokio::task::spawn_blocking(move || client()?.open_stream(&HttpRequest::get(url)).map(|_| ()))
            .await?;
    assert!(matches!(result, Err(TransportError::Status { status: 404, .. })));
    Ok(())
}
