//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use atelier_comfyui::registry::BackendRegistry;
use atelier_pipeline::materializer::Materializer;
use atelier_pipeline::reconciler::{Reconciler, ReconcilerConfig};
use atelier_pipeline::replication::{ReplicationConfig, ReplicationPool, ReplicationQueue};
use atelier_pipeline::service::Pipeline;
use atelier_pipeline::store::{JobStore, MemoryJobStore};
use atelier_storage::fs::FsStore;
use atelier_storage::local::LocalArtifactStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An address nothing listens on.
pub const DEAD_ENDPOINT: &str = "http://127.0.0.1:1";

pub fn registry(endpoints: &[&str]) -> Arc<BackendRegistry> {
    Arc::new(BackendRegistry::with_timeout(
        endpoints.iter().map(|e| e.to_string()).collect(),
        Duration::from_secs(2),
    ))
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

/// History body of a finished job producing `files`.
pub fn ready_history(prompt_id: &str, seed: u64, files: &[&str]) -> Value {
    let images: Vec<Value> = files
        .iter()
        .map(|f| json!({ "filename": f, "subfolder": "", "type": "output" }))
        .collect();
    let entry = json!({
        "prompt": [0, prompt_id, echoed_graph(seed), {}, ["17"]],
        "outputs": { "17": { "images": images } },
        "status": { "status_str": "success", "completed": true, "messages": [] }
    });
    let mut body = serde_json::Map::new();
    body.insert(prompt_id.to_string(), entry);
    Value::Object(body)
}

pub async fn mount_history(server: &MockServer, prompt_id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/history/{prompt_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// A fully wired pipeline over temp directories.
pub struct Harness {
    pub pipeline: Pipeline,
    pub reconciler: Arc<Reconciler>,
    pub jobs: Arc<dyn JobStore>,
    pub output: TempDir,
    pub durable: TempDir,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Wire a pipeline with a replication pool writing to a temp dir.
    pub fn new(endpoints: &[&str], config: ReconcilerConfig) -> Self {
        let registry = registry(endpoints);
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&registry), Arc::clone(&jobs), config));

        let output = tempfile::tempdir().expect("create output dir");
        let durable = tempfile::tempdir().expect("create durable dir");
        let cancel = CancellationToken::new();

        let pool = ReplicationPool::new(
            Arc::new(FsStore::new(durable.path())),
            Arc::clone(&jobs),
            reconciler.event_sender(),
            ReplicationConfig::default(),
        );
        let (queue, _handle) = pool.spawn(cancel.clone());

        Self::assemble(registry, jobs, reconciler, queue, output, durable, cancel)
    }

    /// Wire a pipeline whose replication queue is never drained.
    pub fn without_replication(endpoints: &[&str]) -> (Self, tokio::sync::mpsc::Receiver<atelier_pipeline::replication::ReplicationTask>) {
        let registry = registry(endpoints);
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&jobs),
            ReconcilerConfig::default(),
        ));
        let (queue, rx) = ReplicationQueue::channel(16);
        let output = tempfile::tempdir().expect("create output dir");
        let durable = tempfile::tempdir().expect("create durable dir");

        let harness = Self::assemble(
            registry,
            jobs,
            reconciler,
            queue,
            output,
            durable,
            CancellationToken::new(),
        );
        (harness, rx)
    }

    fn assemble(
        registry: Arc<BackendRegistry>,
        jobs: Arc<dyn JobStore>,
        reconciler: Arc<Reconciler>,
        queue: ReplicationQueue,
        output: TempDir,
        durable: TempDir,
        cancel: CancellationToken,
    ) -> Self {
        let materializer = Arc::new(Materializer::new(
            Arc::clone(&registry),
            LocalArtifactStore::new(output.path()),
            queue,
        ));
        let pipeline = Pipeline::new(
            registry,
            Arc::clone(&jobs),
            Arc::clone(&reconciler),
            materializer,
        );
        Self {
            pipeline,
            reconciler,
            jobs,
            output,
            durable,
            cancel,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
