use api::{Camera, Clip};
use chrono::Utc;
use opendal::services;
use opendal::Operator;
use tempfile::TempDir;

use crate::operator::create_operator;
use crate::{ClipStore, OpendalClipStore, StorageConfig};

fn fs_store(root: &TempDir) -> OpendalClipStore {
    let op = Operator::new(services::Fs::default().root(&root.path().to_string_lossy()))
        .unwrap()
        .finish();
    OpendalClipStore::new(op, "fs")
}

#[test]
fn test_default_storage_config() {
    match StorageConfig::default() {
        StorageConfig::Fs { root } => assert_eq!(root, "./storage"),
        _ => panic!("default storage should be fs"),
    }
}

#[test]
fn test_s3_config_parsing() {
    let config: StorageConfig = toml::from_str(
        r#"
type = "s3"
bucket = "clips"
region = "us-east-1"
endpoint = "http://localhost:9000"
enable_virtual_host_style = true
"#,
    )
    .unwrap();

    match &config {
        StorageConfig::S3 {
            bucket,
            root,
            region,
            enable_virtual_host_style,
            ..
        } => {
            assert_eq!(bucket, "clips");
            assert_eq!(root, "/clips");
            assert_eq!(region.as_deref(), Some("us-east-1"));
            assert!(enable_virtual_host_style);
        }
        _ => panic!("expected s3 storage config"),
    }
    assert_eq!(config.provider(), "s3");
    assert!(create_operator(&config).is_ok());
}

#[test]
fn test_oss_config_parsing() {
    let config: StorageConfig = toml::from_str(
        r#"
type = "oss"
bucket = "clips"
region = "oss-cn-beijing"
endpoint = "https://oss-cn-beijing.aliyuncs.com"
"#,
    )
    .unwrap();
    assert_eq!(config.provider(), "oss");
    assert!(create_operator(&config).is_ok());
}

#[tokio::test]
async fn test_store_and_retrieve_clip() {
    let root = TempDir::new().unwrap();
    let local = TempDir::new().unwrap();
    let file = local.path().join("cam-1_1700000000.mp4");
    tokio::fs::write(&file, b"mp4-bytes").await.unwrap();

    let camera = Camera {
        name: "cam-1".to_string(),
        ..Default::default()
    };
    let mut clip = Clip::new(
        &camera,
        "pod-1",
        file.to_string_lossy().into_owned(),
        2,
        Utc::now(),
        Utc::now(),
    );

    let store = fs_store(&root);
    let reference = store.store_recording_clip(&clip).await.unwrap();
    assert!(reference.starts_with("cam-1/"));
    assert!(reference.ends_with("cam-1_1700000000.mp4"));

    clip.cloud_reference = reference;
    let bytes = store.retrieve_recording_clip(&clip).await.unwrap();
    assert_eq!(bytes, b"mp4-bytes");
}

#[tokio::test]
async fn test_retrieve_without_reference_fails() {
    let root = TempDir::new().unwrap();
    let store = fs_store(&root);
    assert!(store
        .retrieve_recording_clip(&Clip::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_store_key_value() {
    let root = TempDir::new().unwrap();
    let store = fs_store(&root);
    store
        .store_key_value("errors", "cam-1:1700000000000", "stream closed")
        .await
        .unwrap();
    let written = std::fs::read_to_string(root.path().join("errors/cam-1:1700000000000")).unwrap();
    assert_eq!(written, "stream closed");
}
