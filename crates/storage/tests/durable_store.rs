//! Integration tests for the filesystem durable store and the shared
//! name-based deduplication in `DurableStore::put`.

use assert_matches::assert_matches;
use atelier_core::asset::RemoteRef;
use atelier_storage::fs::FsStore;
use atelier_storage::{DurableStore, StoreError};
use bytes::Bytes;
use futures::TryStreamExt;

async fn collect(store: &FsStore, remote: &RemoteRef) -> Vec<u8> {
    let stream = store.get(remote).await.expect("object should exist");
    let chunks: Vec<Bytes> = stream.try_collect().await.expect("stream should succeed");
    chunks.concat()
}

async fn file_count(dir: &std::path::Path) -> usize {
    let mut entries = tokio::fs::read_dir(dir).await.unwrap();
    let mut count = 0;
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    count
}

// ---------------------------------------------------------------------------
// Test: put twice with the same name returns the same reference
// ---------------------------------------------------------------------------

#[tokio::test]
async fn put_same_name_twice_returns_same_reference() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FsStore::new(dir.path());

    let first = store
        .put(Bytes::from_static(b"meow"), "job1_cat.webp")
        .await
        .unwrap();
    let second = store
        .put(Bytes::from_static(b"meow"), "job1_cat.webp")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(file_count(dir.path()).await, 1);
}

// ---------------------------------------------------------------------------
// Test: a same-name upload with different bytes keeps the original
// ---------------------------------------------------------------------------

#[tokio::test]
async fn name_collision_keeps_existing_object() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FsStore::new(dir.path());

    let first = store.put(Bytes::from_static(b"v1"), "x.webp").await.unwrap();
    let second = store.put(Bytes::from_static(b"v2"), "x.webp").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(collect(&store, &first).await, b"v1");
}

// ---------------------------------------------------------------------------
// Test: get streams the stored bytes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_streams_stored_bytes() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FsStore::new(dir.path().join("durable"));

    let payload = vec![7u8; 200_000];
    let remote = store
        .put(Bytes::from(payload.clone()), "big.webp")
        .await
        .unwrap();

    assert_eq!(remote, RemoteRef("big.webp".into()));
    assert_eq!(collect(&store, &remote).await, payload);
}

#[tokio::test]
async fn get_missing_object_is_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FsStore::new(dir.path());

    let err = store
        .get(&RemoteRef("missing.webp".into()))
        .await
        .err()
        .expect("missing object should fail");
    assert_matches!(err, StoreError::NotFound(_));
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = FsStore::new(dir.path());

    assert_matches!(
        store.put(Bytes::from_static(b"x"), "../escape.webp").await,
        Err(StoreError::InvalidName(_))
    );
    assert_matches!(
        store.get(&RemoteRef("../escape.webp".into())).await.err(),
        Some(StoreError::InvalidName(_))
    );
}
