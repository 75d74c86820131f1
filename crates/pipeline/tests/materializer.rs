//! Retrieve path: fetch, local persistence, background replication.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use atelier_core::asset::{ArtifactSource, AssetDescriptor, ImageMetadata};
use atelier_core::job::{JobHandle, JobKey, JobState};
use atelier_pipeline::materializer::Materializer;
use atelier_pipeline::reconciler::ReconcilerConfig;
use atelier_pipeline::replication::ReplicationQueue;
use atelier_storage::local::LocalArtifactStore;
use atelier_pipeline::{JobEvent, JobStatus, PipelineError, StatusAction};
use common::{mount_history, ready_history, Harness};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_view(server: &MockServer, filename: &str, body: &'static [u8], expected: u64) {
    Mock::given(method("GET"))
        .and(path("/view"))
        .and(query_param("filename", filename))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected)
        .mount(server)
        .await;
}

fn handle(job_id: &str, endpoint: &str) -> JobHandle {
    JobHandle {
        job_id: job_id.into(),
        backend_index: 0,
        endpoint: endpoint.into(),
        seed: 42,
    }
}

fn asset(filename: &str) -> AssetDescriptor {
    AssetDescriptor {
        filename: filename.into(),
        subfolder: String::new(),
        kind: "output".into(),
        metadata: ImageMetadata {
            seed: 42,
            ..ImageMetadata::default()
        },
    }
}

// ---------------------------------------------------------------------------
// Test: retrieve returns a local URL with the job's metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieve_serves_local_copy() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", ready_history("job1", 42, &["cat.webp"])).await;
    mount_view(&server, "cat.webp", b"webp-bytes", 1).await;
    let harness = Harness::new(&[&server.uri()], ReconcilerConfig::default());

    let status = harness
        .pipeline
        .check_status(&JobKey::new(0, "job1"), StatusAction::Retrieve)
        .await
        .unwrap();

    let JobStatus::Completed(artifacts) = status else {
        panic!("expected completed, got {status:?}");
    };
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].url, "/local/job1_cat.webp");
    assert_eq!(artifacts[0].source, ArtifactSource::Local);
    assert_eq!(artifacts[0].metadata.seed, 42);
    assert_eq!(artifacts[0].metadata.prompt, "a cat");

    let written = tokio::fs::read(harness.output.path().join("job1_cat.webp")).await.unwrap();
    assert_eq!(written, b"webp-bytes");
}

// ---------------------------------------------------------------------------
// Test: poll never fetches bytes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_action_does_not_fetch() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", ready_history("job1", 42, &["cat.webp"])).await;
    mount_view(&server, "cat.webp", b"x", 0).await;
    let harness = Harness::new(&[&server.uri()], ReconcilerConfig::default());

    let status = harness
        .pipeline
        .check_status(&JobKey::new(0, "job1"), StatusAction::Poll)
        .await
        .unwrap();

    assert_matches!(status, JobStatus::Ready(images) if images[0].filename == "cat.webp");
}

// ---------------------------------------------------------------------------
// Test: concurrent retrieves share one fetch and one write
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_materialization_fetches_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .and(query_param("filename", "cat.webp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(&b"meow"[..])
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (harness, mut rx) = Harness::without_replication(&[&server.uri()]);
    let materializer = harness.pipeline.materializer();
    let h = handle("job1", &server.uri());
    let a = asset("cat.webp");

    let (first, second) = tokio::join!(materializer.materialize(&h, &a), materializer.materialize(&h, &a));

    assert_eq!(first.unwrap(), second.unwrap());
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: distinct assets of one job get distinct names
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assets_of_one_job_do_not_collide() {
    let server = MockServer::start().await;
    mount_view(&server, "a.webp", b"first", 1).await;
    mount_view(&server, "b.webp", b"second", 1).await;
    let (harness, _rx) = Harness::without_replication(&[&server.uri()]);

    let artifacts = harness
        .pipeline
        .materializer()
        .materialize_all(&handle("job1", &server.uri()), &[asset("a.webp"), asset("b.webp")])
        .await
        .unwrap();

    assert_eq!(artifacts[0].name, "job1_a.webp");
    assert_eq!(artifacts[1].name, "job1_b.webp");
    let local = harness.pipeline.materializer().local();
    assert_eq!(&local.read("job1_a.webp").await.unwrap()[..], b"first");
    assert_eq!(&local.read("job1_b.webp").await.unwrap()[..], b"second");
}

// ---------------------------------------------------------------------------
// Test: fetch failure degrades to the backend URL and is retried later
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_falls_back_to_backend_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_view(&server, "cat.webp", b"meow", 1).await;
    let (harness, _rx) = Harness::without_replication(&[&server.uri()]);
    let materializer = harness.pipeline.materializer();
    let h = handle("job1", &server.uri());

    let degraded = materializer.materialize(&h, &asset("cat.webp")).await.unwrap();
    assert_eq!(degraded.source, ArtifactSource::Backend);
    assert!(degraded.url.starts_with(&server.uri()));
    assert!(degraded.url.contains("filename=cat.webp"));

    let recovered = materializer.materialize(&h, &asset("cat.webp")).await.unwrap();
    assert_eq!(recovered.source, ArtifactSource::Local);
    assert_eq!(recovered.url, "/local/job1_cat.webp");
}

// ---------------------------------------------------------------------------
// Test: local write failure degrades to the backend URL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_write_failure_falls_back_to_backend_url() {
    let server = MockServer::start().await;
    mount_view(&server, "cat.webp", b"meow", 1).await;
    let scratch = tempfile::tempdir().unwrap();
    let not_a_dir = scratch.path().join("output");
    tokio::fs::write(&not_a_dir, b"occupied").await.unwrap();
    let (queue, mut rx) = ReplicationQueue::channel(4);
    let materializer = Materializer::new(
        common::registry(&[&server.uri()]),
        LocalArtifactStore::new(&not_a_dir),
        queue,
    );

    let artifact = materializer
        .materialize(&handle("job1", &server.uri()), &asset("cat.webp"))
        .await
        .unwrap();

    assert_eq!(artifact.source, ArtifactSource::Backend);
    assert_eq!(
        artifact.url,
        format!("{}/view?filename=cat.webp&subfolder=&type=output", server.uri())
    );
    assert_eq!(artifact.metadata.seed, 42);
    assert!(rx.try_recv().is_err(), "nothing is replicated without a local copy");
}

// ---------------------------------------------------------------------------
// Test: unknown backend index is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_backend_is_an_error() {
    let (harness, _rx) = Harness::without_replication(&[common::DEAD_ENDPOINT]);
    let mut h = handle("job1", common::DEAD_ENDPOINT);
    h.backend_index = 3;

    assert_matches!(
        harness.pipeline.materializer().materialize(&h, &asset("a.webp")).await,
        Err(PipelineError::UnknownBackend(3))
    );
}

// ---------------------------------------------------------------------------
// Test: status check against an unreachable backend fails
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_check_transport_failure_is_err() {
    let harness = Harness::new(&[common::DEAD_ENDPOINT], ReconcilerConfig::default());

    let result = harness
        .pipeline
        .check_status(&JobKey::new(0, "job1"), StatusAction::Poll)
        .await;

    assert_matches!(result, Err(PipelineError::BackendUnreachable { .. }));
}

// ---------------------------------------------------------------------------
// Test: replication lands in the durable store and is announced
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replication_reaches_durable_store() {
    let server = MockServer::start().await;
    mount_history(&server, "job1", ready_history("job1", 42, &["cat.webp"])).await;
    mount_view(&server, "cat.webp", b"durable", 1).await;
    let harness = Harness::new(&[&server.uri()], ReconcilerConfig::default());
    let mut events = harness.reconciler.subscribe();
    harness.reconciler.track(handle("job1", &server.uri())).await;

    harness
        .pipeline
        .check_status(&JobKey::new(0, "job1"), StatusAction::Retrieve)
        .await
        .unwrap();

    let replicated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(JobEvent::Replicated { name, remote_ref, .. }) => break (name, remote_ref),
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("replication event");

    assert_eq!(replicated.0, "job1_cat.webp");
    let stored = tokio::fs::read(harness.durable.path().join("job1_cat.webp")).await.unwrap();
    assert_eq!(stored, b"durable");

    let record = harness.pipeline.job(&JobKey::new(0, "job1")).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.artifacts[0].remote_ref.as_ref(), Some(&replicated.1));
    assert!(!harness.reconciler.is_tracked(&JobKey::new(0, "job1")).await);
}
