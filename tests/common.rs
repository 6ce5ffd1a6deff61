#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use api::Camera;
use bytes::Bytes;
use capturer::source::{MediaKind, Packet};
use storage::{ClipStore, OpendalClipStore, StorageConfig};

pub const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x01, 0x41, 0xFB, 0x01];
pub const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

pub fn camera(name: &str, priority: i64) -> Camera {
    Camera {
        name: name.to_string(),
        url: format!("file:///tmp/{name}.h264"),
        capture_width: 320,
        capture_height: 240,
        priority,
        analytics: vec!["fire".to_string()],
        media_indexer_types: vec!["database".to_string()],
        alert_types: vec!["slack".to_string()],
        ..Default::default()
    }
}

/// One H.264 access unit at `secs`, keyframes carry SPS and PPS in band.
pub fn h264(is_keyframe: bool, secs: u64) -> Packet {
    let mut data = Vec::new();
    if is_keyframe {
        for nalu in [&SPS[..], &PPS[..]] {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(nalu);
        }
        data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]);
    } else {
        data.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9A, 0x02]);
    }
    Packet {
        idx: 0,
        codec: "H264".to_string(),
        kind: MediaKind::Video,
        is_keyframe,
        dts: Duration::from_secs(secs),
        cts: Duration::ZERO,
        data: Bytes::from(data),
    }
}

pub async fn fs_store(root: &Path) -> Arc<dyn ClipStore> {
    Arc::new(
        OpendalClipStore::from_config(&StorageConfig::Fs {
            root: root.to_string_lossy().into_owned(),
        })
        .await
        .unwrap(),
    )
}
