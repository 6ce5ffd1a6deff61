use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::{topic, Camera, Clip, Command};
use async_trait::async_trait;
use bytes::Bytes;
use pubsub::{MemoryPubSub, PubSub};
use storage::{ClipStore, OpendalClipStore, StorageConfig};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agent::{self, AgentContext};
use crate::assign::{heartbeat, Assigner, Launcher};
use crate::config::{Files, Mode, Recorder};
use crate::handoff::handoff;
use crate::registry::{AgentHandle, Registry};
use crate::roster::{MemoryRoster, Roster};
use crate::segment::clock::SystemClock;
use crate::source::{ChannelSource, MediaKind, Packet, VideoStream};

const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x01, 0x41, 0xFB, 0x01];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

struct FailingStore;

#[async_trait]
impl ClipStore for FailingStore {
    fn provider(&self) -> &str {
        "broken"
    }

    async fn store_recording_clip(&self, _clip: &Clip) -> Result<String> {
        Err(anyhow!("bucket unavailable"))
    }

    async fn retrieve_recording_clip(&self, _clip: &Clip) -> Result<Vec<u8>> {
        Err(anyhow!("bucket unavailable"))
    }

    async fn store_key_value(&self, _store: &str, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("bucket unavailable"))
    }
}

fn camera(name: &str) -> Camera {
    Camera {
        name: name.to_string(),
        url: format!("file:///tmp/{name}.h264"),
        analytics: vec!["fire".to_string()],
        ..Default::default()
    }
}

async fn fs_store(root: &Path) -> Arc<dyn ClipStore> {
    Arc::new(
        OpendalClipStore::from_config(&StorageConfig::Fs {
            root: root.to_string_lossy().into_owned(),
        })
        .await
        .unwrap(),
    )
}

fn local_clip(dir: &Path, camera: &Camera) -> Clip {
    let path = dir.join(format!("{}_1.mp4", camera.name));
    std::fs::write(&path, b"not really an mp4").unwrap();
    let now = chrono::Utc::now();
    Clip::new(
        camera,
        "capturer-a",
        path.to_string_lossy().into_owned(),
        2,
        now - chrono::Duration::seconds(3),
        now,
    )
}

fn context(recordings: &Path, store: Arc<dyn ClipStore>, pubsub: Arc<dyn PubSub>) -> AgentContext {
    AgentContext {
        capturer: "capturer-a".to_string(),
        mode: Mode::Streaming,
        recorder: Recorder {
            dir: recordings.to_string_lossy().into_owned(),
            max_clip_seconds: 0,
            window: None,
            error_store: Some("errors".to_string()),
        },
        files: Files::default(),
        store,
        pubsub,
        roster: Arc::new(MemoryRoster::new()),
        clock: Arc::new(SystemClock),
    }
}

fn keyframe(secs: u64) -> Packet {
    let mut data = Vec::new();
    for nalu in [&SPS[..], &PPS[..], &[0x65, 0x88, 0x84][..]] {
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(nalu);
    }
    Packet {
        idx: 0,
        codec: "H264".to_string(),
        kind: MediaKind::Video,
        is_keyframe: true,
        dts: Duration::from_secs(secs),
        cts: Duration::ZERO,
        data: Bytes::from(data),
    }
}

#[tokio::test]
async fn test_handoff_uploads_publishes_and_deletes() {
    let local = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let store = fs_store(bucket.path()).await;
    let bus = MemoryPubSub::new();
    let mut recordings = bus.subscribe(topic::RECORDINGS).await.unwrap();

    let clip = local_clip(local.path(), &camera("cam-1"));
    let local_file = clip.local_reference.clone();
    let outcome = handoff(clip, store.as_ref(), &bus).await;
    assert!(outcome.uploaded && outcome.published && outcome.deleted);
    assert!(!Path::new(&local_file).exists());

    let msg = recordings.recv().await.unwrap();
    let published = Clip::from_json(&msg.payload).unwrap();
    assert_eq!(published.storage_provider, "fs");
    assert!(!published.cloud_reference.is_empty());
    let bytes = store.retrieve_recording_clip(&published).await.unwrap();
    assert_eq!(bytes, b"not really an mp4");
}

#[tokio::test]
async fn test_handoff_upload_failure_still_publishes_and_deletes() {
    let local = TempDir::new().unwrap();
    let bus = MemoryPubSub::new();
    let mut recordings = bus.subscribe(topic::RECORDINGS).await.unwrap();

    let clip = local_clip(local.path(), &camera("cam-1"));
    let local_file = clip.local_reference.clone();
    let outcome = handoff(clip, &FailingStore, &bus).await;
    assert!(!outcome.uploaded);
    assert!(outcome.published);
    assert!(outcome.deleted);
    assert!(!Path::new(&local_file).exists());

    let published = Clip::from_json(&recordings.recv().await.unwrap().payload).unwrap();
    assert!(published.cloud_reference.is_empty());
    assert!(published.storage_provider.is_empty());
}

#[tokio::test]
async fn test_handoff_missing_file_is_not_fatal() {
    let bus = MemoryPubSub::new();
    let mut clip = local_clip(TempDir::new().unwrap().path(), &camera("cam-1"));
    clip.local_reference = "/nonexistent/clip.mp4".to_string();
    let outcome = handoff(clip, &FailingStore, &bus).await;
    assert!(!outcome.uploaded);
    assert!(outcome.published);
    assert!(!outcome.deleted);
}

#[tokio::test]
async fn test_streaming_agent_hands_off_and_obeys_commands() {
    let recordings = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let bus = Arc::new(MemoryPubSub::new());
    let mut published = bus.subscribe(topic::RECORDINGS).await.unwrap();
    let ctx = context(recordings.path(), fs_store(bucket.path()).await, bus.clone());

    let (input, input_rx) = mpsc::channel(10);
    let source = ChannelSource::new(
        vec![VideoStream {
            name: "video".to_string(),
            codec: "H264".to_string(),
            width: 320,
            height: 240,
            ..Default::default()
        }],
        input_rx,
    );
    let mut paused = source.paused();

    let (commands, commands_rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(agent::run_streaming(
        ctx,
        camera("cam-1"),
        Box::new(source),
        commands_rx,
        cancel.clone(),
    ));

    input.send(keyframe(0)).await.unwrap();
    input.send(keyframe(1)).await.unwrap();
    let msg = timeout(Duration::from_secs(5), published.recv())
        .await
        .unwrap()
        .unwrap();
    let clip = Clip::from_json(&msg.payload).unwrap();
    assert_eq!(clip.camera, "cam-1");
    assert_eq!(clip.frames, 3);
    assert!(!clip.cloud_reference.is_empty());

    commands.send(Command::Pause).await.unwrap();
    timeout(Duration::from_secs(5), paused.wait_for(|p| *p))
        .await
        .unwrap()
        .unwrap();
    commands.send(Command::Resume).await.unwrap();
    timeout(Duration::from_secs(5), paused.wait_for(|p| !*p))
        .await
        .unwrap()
        .unwrap();

    cancel.cancel();
    assert!(timeout(Duration::from_secs(5), task).await.unwrap().unwrap().is_ok());
    assert!(!Path::new(&clip.local_reference).exists());
}

#[tokio::test]
async fn test_agent_errors_reach_error_store() {
    let recordings = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let bus = Arc::new(MemoryPubSub::new());
    let ctx = context(recordings.path(), fs_store(bucket.path()).await, bus);

    let (input, input_rx) = mpsc::channel(10);
    let source = ChannelSource::new(vec![], input_rx);
    let (_commands, commands_rx) = mpsc::channel(10);
    let task = tokio::spawn(agent::run_streaming(
        ctx,
        camera("cam-1"),
        Box::new(source),
        commands_rx,
        CancellationToken::new(),
    ));

    let mut bare = keyframe(0);
    bare.data = Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]);
    input.send(bare).await.unwrap();
    drop(input);
    assert!(timeout(Duration::from_secs(5), task).await.unwrap().unwrap().is_ok());

    let errors: Vec<_> = std::fs::read_dir(bucket.path().join("errors"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("cam-1:"));
}

#[tokio::test]
async fn test_unsupported_codec_stops_agent() {
    let recordings = TempDir::new().unwrap();
    let ctx = context(recordings.path(), Arc::new(FailingStore), Arc::new(MemoryPubSub::new()));
    let (input, input_rx) = mpsc::channel(10);
    let (_commands, commands_rx) = mpsc::channel(10);
    let task = tokio::spawn(agent::run_streaming(
        ctx,
        camera("cam-1"),
        Box::new(ChannelSource::new(vec![], input_rx)),
        commands_rx,
        CancellationToken::new(),
    ));

    let mut packet = keyframe(0);
    packet.codec = "MJPEG".to_string();
    input.send(packet).await.unwrap();
    let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(outcome.unwrap_err().is_fatal());
}

#[tokio::test]
async fn test_files_agent_produces_clips() {
    let samples = TempDir::new().unwrap();
    let recordings = TempDir::new().unwrap();
    std::fs::write(samples.path().join("sample.mp4"), b"sample").unwrap();

    let bus = Arc::new(MemoryPubSub::new());
    let ctx = context(recordings.path(), Arc::new(FailingStore), bus);
    let clip = agent::files::produce_clip(
        samples.path(),
        recordings.path(),
        "capturer-a",
        &camera("cam-1"),
        &ctx,
        Duration::from_secs(3),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&clip.local_reference).unwrap(), b"sample");
    let begin = api::parse_time(&clip.begin_time).unwrap();
    let end = api::parse_time(&clip.end_time).unwrap();
    assert_eq!(end - begin, chrono::Duration::seconds(3));

    let empty = TempDir::new().unwrap();
    assert!(agent::files::produce_clip(
        empty.path(),
        recordings.path(),
        "capturer-a",
        &camera("cam-1"),
        &ctx,
        Duration::from_secs(3),
    )
    .await
    .is_err());
}

#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<String>>,
}

impl Launcher for RecordingLauncher {
    fn launch(&self, camera: Camera, cancel: CancellationToken) -> AgentHandle {
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(camera.name.clone());
        }
        let (commands, _rx) = mpsc::channel(10);
        let token = cancel.clone();
        AgentHandle {
            commands,
            cancel,
            task: tokio::spawn(async move { token.cancelled().await }),
        }
    }
}

#[tokio::test]
async fn test_exclusive_roster_refuses_second_claim() {
    let roster = Arc::new(MemoryRoster::exclusive(Duration::from_secs(60), Arc::new(SystemClock)));
    roster.register_camera(&camera("cam-1")).await.unwrap();
    let cancel = CancellationToken::new();

    let mut launchers = Vec::new();
    let mut assigners = Vec::new();
    for name in ["a", "b"] {
        let launcher = Arc::new(RecordingLauncher::default());
        launchers.push(launcher.clone());
        assigners.push(Assigner::new(
            name,
            2,
            Duration::from_secs(60),
            roster.clone(),
            Registry::new(),
            launcher,
            Arc::new(SystemClock),
        ));
    }
    roster
        .heartbeat(
            &api::CapturerRecord {
                name: "a".to_string(),
                capacity: 2,
                heartbeat: chrono::Utc::now(),
                agents: 0,
            },
            &[],
        )
        .await
        .unwrap();

    // b sees the live ownership of a
    let first = assigners[0].discover_once(&cancel).await.unwrap();
    let second = assigners[1].discover_once(&cancel).await.unwrap();
    assert_eq!(first, vec!["cam-1".to_string()]);
    assert!(second.is_empty());
    assert!(launchers[1].launched.lock().unwrap().is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn test_orphaned_camera_is_reclaimed() {
    let roster = Arc::new(MemoryRoster::new());
    roster.register_camera(&camera("cam-1")).await.unwrap();
    roster.claim("cam-1", "dead").await.unwrap();
    roster
        .heartbeat(
            &api::CapturerRecord {
                name: "dead".to_string(),
                capacity: 1,
                heartbeat: chrono::Utc::now() - chrono::Duration::seconds(600),
                agents: 1,
            },
            &[],
        )
        .await
        .unwrap();

    let registry = Registry::new();
    let assigner = Assigner::new(
        "a",
        1,
        Duration::from_secs(60),
        roster.clone(),
        registry.clone(),
        Arc::new(RecordingLauncher::default()),
        Arc::new(SystemClock),
    );
    let cancel = CancellationToken::new();
    assert_eq!(
        assigner.discover_once(&cancel).await.unwrap(),
        vec!["cam-1".to_string()]
    );
    assert_eq!(
        roster.cameras().await.unwrap()[0].capturer.as_deref(),
        Some("a")
    );

    // a finished agent is reaped, released and claimed again
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let again = assigner.discover_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(again, vec!["cam-1".to_string()]);
    assert_eq!(registry.active().await, 1);
}

#[tokio::test]
async fn test_heartbeat_publishes_record() {
    let roster = Arc::new(MemoryRoster::new());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(heartbeat::run(
        "a".to_string(),
        3,
        roster.clone(),
        Registry::new(),
        Arc::new(SystemClock),
        Duration::from_secs(60),
        cancel.clone(),
    ));

    let mut records = Vec::new();
    for _ in 0..50 {
        records = roster.capturers().await.unwrap();
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].capacity, 3);
    assert_eq!(records[0].agents, 0);

    cancel.cancel();
    task.await.unwrap();
}
