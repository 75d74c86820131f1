//! Shared helpers for API integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_storage::fs::FsStore;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// An address nothing listens on.
pub const DEAD_ENDPOINT: &str = "http://127.0.0.1:1";

/// Build a test `ServerConfig` pointing at `endpoints` and temp dirs.
pub fn test_config(endpoints: &[&str], output: &TempDir, durable: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        backend_endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        backend_timeout: Duration::from_secs(2),
        output_dir: output.path().to_path_buf(),
        durable_dir: durable.path().to_path_buf(),
        ..ServerConfig::default()
    }
}

/// A router over a fully wired state plus the directories behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub output: TempDir,
    pub durable: TempDir,
    cancel: CancellationToken,
}

impl TestApp {
    pub fn new(endpoints: &[&str]) -> Self {
        Self::with_config(endpoints, |_| {})
    }

    pub fn with_config(endpoints: &[&str], customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let output = tempfile::tempdir().expect("create output dir");
        let durable = tempfile::tempdir().expect("create durable dir");
        let mut config = test_config(endpoints, &output, &durable);
        customize(&mut config);

        let cancel = CancellationToken::new();
        let store = Arc::new(FsStore::new(durable.path()));
        let (state, _replication) = AppState::assemble(config.clone(), store, cancel.clone());
        let router = build_app_router(state.clone(), &config).expect("build router");

        Self {
            router,
            state,
            output,
            durable,
            cancel,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(post_json_request(uri, body)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn post_json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Job graph as echoed back in a history record.
pub fn echoed_graph(seed: u64) -> Value {
    json!({
        "3": { "inputs": { "seed": seed, "steps": 20, "cfg": 7, "model": ["4", 0] }, "class_type": "KSampler" },
        "5": { "inputs": { "width": 832, "height": 1216, "batch_size": 1 }, "class_type": "EmptyLatentImage" },
        "6": { "inputs": { "text": "a cat", "clip": ["4", 1] }, "class_type": "CLIPTextEncode" },
        "7": { "inputs": { "text": "blurry", "clip": ["4", 1] }, "class_type": "CLIPTextEncode" }
    })
}

/// History body for `prompt_id` with `files` on the output node.
pub fn history(prompt_id: &str, seed: u64, files: &[&str]) -> Value {
    let images: Vec<Value> = files
        .iter()
        .map(|f| json!({ "filename": f, "subfolder": "", "type": "output" }))
        .collect();
    let mut body = serde_json::Map::new();
    body.insert(
        prompt_id.to_string(),
        json!({
            "prompt": [0, prompt_id, echoed_graph(seed), {}, ["17"]],
            "outputs": { "17": { "images": images } },
            "status": { "status_str": "success", "completed": !files.is_empty(), "messages": [] }
        }),
    );
    Value::Object(body)
}
