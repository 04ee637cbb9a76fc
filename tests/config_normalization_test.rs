//! Configuration normalization tests
//!
//! Real-world YAML inputs through the loader and `normalize()`.

use connector_gcs::config::{ConfigLoader, NormalizedConfig, DEFAULT_WORKDIR};
use std::path::PathBuf;
use std::time::Duration;

fn normalize(yaml: &str) -> Result<NormalizedConfig, String> {
    ConfigLoader::from_yaml(yaml)
        .and_then(|c| c.normalize())
        .map_err(|e| e.to_string())
}

#[test]
fn test_string_timeouts_are_converted() {
    let normalized = normalize(
        r#"
outputs: gs://test-bucket/test.mp4
sources: tcp://127.0.0.1:5550
workdir: test_workdir
timeout: "60.5"
manifest: file://test.json
manifest_field: test.files
image_directory: /path/to/images
"#,
    )
    .unwrap();

    assert_eq!(normalized.workdir.as_deref(), Some("test_workdir"));
    assert_eq!(normalized.timeout, Some(Duration::from_millis(60_500)));
    assert_eq!(normalized.manifest.as_deref(), Some("file://test.json"));
    assert_eq!(normalized.manifest_field_path(), "test.files");
    assert_eq!(normalized.image_dir(), Some(PathBuf::from("/path/to/images")));

    let int_string = normalize(
        "outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\ntimeout: '120'\n",
    )
    .unwrap();
    assert_eq!(int_string.timeout_duration(), Some(Duration::from_secs(120)));
}

#[test]
fn test_required_parameters() {
    let err = normalize("sources: tcp://127.0.0.1:5550\n").unwrap_err();
    assert!(err.contains("must specify at least one output"), "{err}");

    let err = normalize("outputs: gs://test-bucket/test.mp4\n").unwrap_err();
    assert!(err.contains("must specify at least one source"), "{err}");

    let minimal =
        normalize("outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\n").unwrap();
    assert!(minimal.workdir.is_none());
    assert!(minimal.timeout.is_none());
    assert!(minimal.manifest.is_none());
    assert!(minimal.manifest_field.is_none());
    assert!(minimal.image_directory.is_none());
}

#[test]
fn test_gs_url_validation() {
    for url in [
        "gs://bucket/path/file.mp4",
        "gs://my-bucket/subfolder/video_%Y-%m-%d.mp4",
        "gs://bucket-with-dashes/path/file.mp4",
        "gs://bucket.with.dots/path/file.mp4",
    ] {
        let yaml = format!("outputs: '{url}'\nsources: tcp://127.0.0.1:5550\n");
        let normalized = normalize(&yaml).unwrap_or_else(|e| panic!("{url}: {e}"));
        assert_eq!(normalized.outputs.len(), 1);
        assert_eq!(normalized.outputs[0].output, url);
    }

    for url in [
        "file://local-file.mp4",
        "gs://bucket-only",
        "gs://",
        "gs://bucket/",
        "http://bucket/path/file.mp4",
        "s3://bucket/path/file.mp4",
    ] {
        let yaml = format!("outputs: '{url}'\nsources: tcp://127.0.0.1:5550\n");
        assert!(normalize(&yaml).is_err(), "{url} should be rejected");
    }

    let err =
        normalize("outputs: s3://bucket/path/file.mp4\nsources: tcp://127.0.0.1:5550\n").unwrap_err();
    assert!(err.contains("can only specify gs:// outputs"), "{err}");
}

#[test]
fn test_output_options_are_split_off() {
    let normalized = normalize(
        "outputs: gs://bucket/videos/clip_%H.mp4!segtime=0.5\nsources: tcp://127.0.0.1:5550\n",
    )
    .unwrap();
    let output = &normalized.outputs[0];
    assert_eq!(output.output, "gs://bucket/videos/clip_%H.mp4");
    assert_eq!(output.bucket, "bucket");
    assert_eq!(output.segment_interval().unwrap(), Some(Duration::from_secs(30)));
}

#[test]
fn test_manifest_configuration() {
    let file_manifest = normalize(
        r#"
outputs: gs://test-bucket/test.mp4
sources: tcp://127.0.0.1:5550
manifest: file://test_manifest.json
manifest_field: test.files
"#,
    )
    .unwrap();
    assert_eq!(file_manifest.manifest.as_deref(), Some("file://test_manifest.json"));
    assert!(!file_manifest.manifest_locator().unwrap().unwrap().is_remote());

    let gs_manifest = normalize(
        r#"
outputs: gs://test-bucket/test.mp4
sources: tcp://127.0.0.1:5550
manifest: gs://test-bucket/manifest_template.json
manifest_field: data.files
"#,
    )
    .unwrap();
    assert!(gs_manifest.manifest_locator().unwrap().unwrap().is_remote());
    assert_eq!(gs_manifest.manifest_field_path(), "data.files");

    let none = normalize(
        "outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\nmanifest: null\nmanifest_field: null\n",
    )
    .unwrap();
    assert!(none.manifest_locator().unwrap().is_none());
    assert_eq!(none.manifest_field_path(), "files");
}

#[test]
fn test_workdir_and_numeric_timeout() {
    let absolute = normalize(
        "outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\nworkdir: /custom/work/directory\ntimeout: 120.0\n",
    )
    .unwrap();
    assert_eq!(absolute.workdir_path(), PathBuf::from("/custom/work/directory"));
    assert_eq!(absolute.timeout, Some(Duration::from_secs(120)));

    let relative = normalize(
        "outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\nworkdir: relative/path\ntimeout: 30\n",
    )
    .unwrap();
    assert_eq!(relative.workdir_path(), PathBuf::from("relative/path"));
    assert_eq!(relative.timeout, Some(Duration::from_secs(30)));
}

#[test]
fn test_multiple_outputs() {
    let normalized = normalize(
        r#"
outputs:
  - gs://bucket1/path1/video1.mp4
  - gs://bucket2/path2/video2.mp4
sources: tcp://127.0.0.1:5550
"#,
    )
    .unwrap();
    assert_eq!(normalized.outputs.len(), 2);
    assert_eq!(normalized.outputs[0].bucket, "bucket1");
    assert_eq!(normalized.outputs[1].bucket, "bucket2");
}

#[test]
fn test_empty_strings_are_preserved() {
    let normalized = normalize(
        r#"
outputs: gs://test-bucket/test.mp4
sources: tcp://127.0.0.1:5550
workdir: ""
manifest: ""
manifest_field: ""
image_directory: ""
"#,
    )
    .unwrap();

    assert_eq!(normalized.workdir.as_deref(), Some(""));
    assert_eq!(normalized.manifest.as_deref(), Some(""));
    assert_eq!(normalized.manifest_field.as_deref(), Some(""));
    assert_eq!(normalized.image_directory.as_deref(), Some(""));

    // Treated as absent only when uploaders are built
    assert_eq!(normalized.workdir_path(), PathBuf::from(DEFAULT_WORKDIR));
    assert!(normalized.manifest_locator().unwrap().is_none());
    assert_eq!(normalized.manifest_field_path(), "files");
    assert!(normalized.image_dir().is_none());
}

#[test]
fn test_invalid_timeouts() {
    for timeout in ["'abc'", "-5", "'-1.0'", "1e300"] {
        let yaml = format!(
            "outputs: gs://test-bucket/test.mp4\nsources: tcp://127.0.0.1:5550\ntimeout: {timeout}\n"
        );
        assert!(normalize(&yaml).is_err(), "timeout {timeout} should be rejected");
    }
}
