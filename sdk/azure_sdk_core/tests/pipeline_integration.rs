//! End-to-end tests of the assembled pipeline against a local mock server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use azure_sdk_core::credentials::{AccessToken, StaticTokenCredential};
use azure_sdk_core::http::{Method, Request};
use azure_sdk_core::instrumentation::{InstrumentationConfig, TraceContext, TracingSettings};
use azure_sdk_core::policies::RetryOptions;
use azure_sdk_core::polling::{OperationState, Poller, StatusPollingMethod};
use azure_sdk_core::{AzureError, Pipeline};
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credential() -> Arc<StaticTokenCredential> {
    Arc::new(StaticTokenCredential::new(AccessToken::new(
        "integration-token",
        SystemTime::now() + Duration::from_secs(3600),
    )))
}

fn pipeline(tracing: TracingSettings) -> Pipeline {
    Pipeline::builder()
        .component("integration", "0.0.1")
        .credential(credential(), ["https://example.com/.default"])
        .allow_insecure_http(true)
        .retry(RetryOptions::fixed(Duration::from_millis(10), 3))
        .tracing(tracing)
        .build()
        .expect("pipeline should build")
}

#[tokio::test]
async fn retries_keep_request_id_and_reauthenticate_each_attempt() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let seen_ids = Arc::new(Mutex::new(Vec::new()));
    let (counter, ids) = (attempts.clone(), seen_ids.clone());

    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("Authorization", "Bearer integration-token"))
        .respond_with(move |req: &wiremock::Request| {
            let id = req
                .headers
                .get("x-ms-client-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            ids.lock().unwrap().push(id);
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_string("ready")
            }
        })
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/resource", server.uri())).unwrap();
    let mut request = Request::new(Method::GET, url);
    let response = pipeline(TracingSettings::disabled())
        .send(&mut request)
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let ids = seen_ids.lock().unwrap();
    assert_eq!(ids.len(), 3);
    assert!(!ids[0].is_empty());
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test]
async fn native_tracing_propagates_parent_trace_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("traceparent"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let parent = TraceContext::new_root();
    let mut request = Request::new(Method::GET, Url::parse(&server.uri()).unwrap())
        .with_context(parent.clone());

    let settings = TracingSettings::native(InstrumentationConfig::default());
    pipeline(settings).send(&mut request).await.unwrap();

    let sent = request.headers().get("traceparent").unwrap();
    let child = TraceContext::parse_traceparent(sent).unwrap();
    assert_eq!(child.trace_id, parent.trace_id);
    assert_ne!(child.span_id, parent.span_id);
}

#[tokio::test]
async fn status_poller_follows_operation_location() {
    let server = MockServer::start().await;
    let polls = Arc::new(AtomicU32::new(0));
    let counter = polls.clone();

    Mock::given(method("GET"))
        .and(path("/operations/42"))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "Running"}))
                    .insert_header("retry-after-ms", "10")
            } else {
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "Succeeded", "id": "42"}))
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/operations/42", server.uri())),
        )
        .mount(&server)
        .await;

    let pipeline = pipeline(TracingSettings::disabled());
    let mut start = Request::new(
        Method::POST,
        Url::parse(&format!("{}/jobs", server.uri())).unwrap(),
    );
    let initial = pipeline.send(&mut start).await.unwrap();
    assert_eq!(initial.status(), 202);

    let method = StatusPollingMethod::new(pipeline, initial)
        .unwrap()
        .with_interval(Duration::from_millis(10));
    let status = Poller::new(method).result().await.unwrap();

    assert_eq!(status.state, OperationState::Succeeded);
    assert_eq!(status.body["id"], "42");
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_retriable_status_is_returned_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": "BadParameter", "message": "bad"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = Request::new(Method::GET, Url::parse(&server.uri()).unwrap());
    let err = pipeline(TracingSettings::disabled())
        .send(&mut request)
        .await
        .unwrap()
        .into_result()
        .unwrap_err();

    assert!(matches!(err, AzureError::Http { status: 400, .. }));
    assert_eq!(err.error_code(), Some("BadParameter"));
}
