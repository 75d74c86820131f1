//! GET /api/status and the local artifact it hands out.

mod common;

use axum::http::StatusCode;
use common::{body_bytes, body_json, history, TestApp, DEAD_ENDPOINT};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_history(server: &MockServer, prompt_id: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/history/{prompt_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_view(server: &MockServer, filename: &str, body: &'static [u8], expected: u64) {
    Mock::given(method("GET"))
        .and(path("/view"))
        .and(query_param("filename", filename))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected)
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Test: query validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_job_id_is_400() {
    let app = TestApp::new(&[DEAD_ENDPOINT]);

    let response = app.get("/api/status?backendIndex=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json, json!({ "status": "error", "error": "Missing jobId" }));
}

#[tokio::test]
async fn non_numeric_backend_index_is_400() {
    let app = TestApp::new(&[DEAD_ENDPOINT]);

    let response = app.get("/api/status?jobId=job1&backendIndex=two").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn out_of_range_backend_index_is_400() {
    let app = TestApp::new(&[DEAD_ENDPOINT]);

    let response = app.get("/api/status?jobId=job1&backendIndex=3").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], "error");
}

// ---------------------------------------------------------------------------
// Test: pending, processing and ready states
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_without_history_is_pending() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", json!({})).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "pending" }));
}

#[tokio::test]
async fn job_without_images_is_processing() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", history("job1", 42, &[])).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1&backendIndex=0").await;
    assert_eq!(body_json(response).await, json!({ "status": "processing" }));
}

#[tokio::test]
async fn poll_reports_ready_without_fetching() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", history("job1", 42, &["cat.webp"])).await;
    mount_view(&server, "cat.webp", b"x", 0).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1&action=poll").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["images"].as_array().unwrap().len(), 1);
    assert_eq!(json["images"][0]["filename"], "cat.webp");
}

#[tokio::test]
async fn legacy_parameter_names_are_accepted() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", json!({})).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?promptId=job1&apiIndex=0").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "pending");
}

// ---------------------------------------------------------------------------
// Test: retrieve materializes and the URL is servable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieve_completes_with_local_urls() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", history("job1", 42, &["cat.webp"])).await;
    mount_view(&server, "cat.webp", b"webp-bytes", 1).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1&action=retrieve").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "completed");
    let image = &json["images"][0];
    assert_eq!(image["url"], "/local/job1_cat.webp");
    assert_eq!(image["metadata"]["seed"], 42);
    assert_eq!(image["metadata"]["prompt"], "a cat");

    let served = app.get("/local/job1_cat.webp").await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers()["content-type"], "image/webp");
    assert_eq!(body_bytes(served).await, b"webp-bytes");
}

// ---------------------------------------------------------------------------
// Test: failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_failure_is_200_error() {
    let server = MockServer::start().await;
    mount_history(
        &server,
        "job1",
        json!({
            "job1": {
                "prompt": [0, "job1", {}, {}, ["17"]],
                "outputs": {},
                "status": { "status_str": "error", "completed": false, "messages": [] }
            }
        }),
    )
    .await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn unreachable_backend_is_500() {
    let app = TestApp::new(&[DEAD_ENDPOINT]);

    let response = app.get("/api/status?jobId=job1").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn busy_backend_is_500_and_job_is_not_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/job1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_history(&server, "job1", json!({})).await;
    let app = TestApp::new(&[&server.uri()]);

    let response = app.get("/api/status?jobId=job1").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["status"], "error");

    let response = app.get("/api/status?jobId=job1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "pending" }));
}
