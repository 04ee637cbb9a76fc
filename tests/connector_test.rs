//! Connector lifecycle tests
//!
//! Full setup / notify / shutdown runs against the in-memory store.

use connector_gcs::config::{ConfigLoader, NormalizedConfig};
use connector_gcs::connector::{Connector, ConnectorError};
use connector_gcs::storage::MemoryStore;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(yaml: &str) -> NormalizedConfig {
    ConfigLoader::from_yaml(yaml).unwrap().normalize().unwrap()
}

/// Poll until `check` passes or two seconds elapse
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn base_yaml(workdir: &Path) -> String {
    format!(
        "outputs: gs://media/streams/cam1/clip.mp4\nsources: tcp://127.0.0.1:5550\nworkdir: {}\npoll_interval_secs: 0.02\n",
        workdir.display()
    )
}

#[tokio::test]
async fn test_notified_segment_is_uploaded() {
    let workdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let mut connector = Connector::new(config(&base_yaml(workdir.path())), store.clone());
    connector.setup().await.unwrap();

    let dir = connector.output_dir(0).unwrap();
    let segment = dir.join("clip_0001.mp4");
    std::fs::write(&segment, b"segment data").unwrap();
    connector.notify_segment_closed(0, segment.clone()).unwrap();

    assert!(
        eventually(|| store.object("media", "streams/cam1/clip_0001.mp4").is_some()).await,
        "segment was not uploaded"
    );
    assert!(eventually(|| !segment.exists()).await);

    connector.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_timestamped_segments_found_by_sweep() {
    let workdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let yaml = format!(
        "outputs: gs://media/cam/test_video_%Y-%m-%d_%H-%M-%S.mp4\nsources: tcp://127.0.0.1:5550\nworkdir: {}\npoll_interval_secs: 0.02\n",
        workdir.path().display()
    );
    let mut connector = Connector::new(config(&yaml), store.clone());
    connector.setup().await.unwrap();

    // Named after setup, no notification sent
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let name = chrono::Local::now()
        .format("test_video_%Y-%m-%d_%H-%M-%S.mp4")
        .to_string();
    let segment = connector.output_dir(0).unwrap().join(&name);
    std::fs::write(&segment, b"segment data").unwrap();

    let key = format!("cam/{name}");
    assert!(
        eventually(|| store.object("media", &key).is_some()).await,
        "{name} was not swept"
    );

    connector.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_local_manifest_published_next_to_segments() {
    let workdir = tempfile::tempdir().unwrap();
    let template = workdir.path().join("template.json");
    std::fs::write(&template, r#"{"job": {"id": "abc"}}"#).unwrap();

    let yaml = format!(
        "{}manifest: file://{}\nmanifest_field: job.files\n",
        base_yaml(workdir.path()),
        template.display()
    );
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let mut connector = Connector::new(config(&yaml), store.clone());
    connector.setup().await.unwrap();

    let segment = connector.output_dir(0).unwrap().join("clip_0001.mp4");
    std::fs::write(&segment, b"x").unwrap();
    connector.notify_segment_closed(0, segment).unwrap();

    assert!(eventually(|| store.object("media", "streams/cam1/template.json").is_some()).await);
    let manifest: Value =
        serde_json::from_slice(&store.object("media", "streams/cam1/template.json").unwrap())
            .unwrap();
    assert_eq!(manifest, json!({"job": {"id": "abc", "files": ["clip_0001.mp4"]}}));

    connector.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_image_directory_uploads_under_default_prefix() {
    let workdir = tempfile::tempdir().unwrap();
    let images = tempfile::tempdir().unwrap();
    std::fs::write(images.path().join("frame.jpg"), b"jpg").unwrap();

    let yaml = format!("{}image_directory: {}\n", base_yaml(workdir.path()), images.path().display());
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let mut connector = Connector::new(config(&yaml), store.clone());
    connector.setup().await.unwrap();

    assert!(
        eventually(|| store.object("media", "streams/cam1/images/frame.jpg").is_some()).await,
        "image was not uploaded: {:?}",
        store.keys("media")
    );
    connector.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_missing_local_manifest_is_fatal() {
    let workdir = tempfile::tempdir().unwrap();
    let yaml = format!("{}manifest: /nonexistent/manifest.json\n", base_yaml(workdir.path()));
    let mut connector = Connector::new(config(&yaml), Arc::new(MemoryStore::with_buckets(["media"])));

    assert!(matches!(
        connector.setup().await,
        Err(ConnectorError::Manifest(_))
    ));
    assert_eq!(connector.uploader_count(), 0);
}

#[tokio::test]
async fn test_notify_before_setup_and_after_shutdown() {
    let workdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let mut connector = Connector::new(config(&base_yaml(workdir.path())), store);

    assert!(matches!(
        connector.notify_segment_closed(0, "/tmp/clip.mp4"),
        Err(ConnectorError::UnknownOutput(0))
    ));

    connector.setup().await.unwrap();
    connector.shutdown(Duration::from_secs(1)).await;

    assert!(connector.notify_segment_closed(0, "/tmp/clip.mp4").is_err());
}

#[tokio::test]
async fn test_shutdown_is_prompt() {
    let workdir = tempfile::tempdir().unwrap();
    // One-hour segments: the uploader sleeps for an hour between cycles
    let yaml = format!(
        "outputs: gs://media/clip.mp4!segtime=60\nsources: tcp://127.0.0.1:5550\nworkdir: {}\n",
        workdir.path().display()
    );
    let store = Arc::new(MemoryStore::with_buckets(["media"]));
    let mut connector = Connector::new(config(&yaml), store);
    connector.setup().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let aborted = connector.shutdown(Duration::from_secs(5)).await;
    assert_eq!(aborted, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}
