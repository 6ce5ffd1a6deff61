use std::env;
use std::path::PathBuf;
use std::time::Duration;

use api::Camera;
use pubsub::PubSubConfig;
use serde::{Deserialize, Serialize};
use storage::StorageConfig;

use crate::roster::RosterConfig;
use crate::segment::window::RecordingWindow;
use crate::segment::SegmenterConfig;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub capturer: Capturer,
    #[serde(default)]
    pub recorder: Recorder,
    #[serde(default)]
    pub files: Files,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    /// Cameras seeded into the roster at startup
    #[serde(default)]
    pub cameras: Vec<Camera>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Segment live streams
    #[default]
    Streaming,
    /// Replay sample clips from disk
    Files,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capturer {
    #[serde(default = "default_capturer_name")]
    pub name: String,
    /// Maximum concurrent camera agents
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Seconds after which a silent capturer counts as dead
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold: u64,
    #[serde(default)]
    pub mode: Mode,
    /// Seconds agents get to write trailers on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recorder {
    #[serde(default = "default_recordings_dir")]
    pub dir: String,
    /// Clip length ceiling in seconds when the camera sets none
    #[serde(default = "default_max_clip_seconds")]
    pub max_clip_seconds: u64,
    /// Only open clips inside this UTC time-of-day window, e.g. "22:00-06:00"
    #[serde(default)]
    pub window: Option<RecordingWindow>,
    /// Key/value store agent errors are also written to
    #[serde(default)]
    pub error_store: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Files {
    /// Directory of sample `.mp4` clips
    #[serde(default = "default_samples_dir")]
    pub dir: String,
    #[serde(default = "default_files_interval")]
    pub interval: u64,
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_capturer_name() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "capturer".to_string())
}

fn default_capacity() -> usize {
    4
}

fn default_discovery_interval() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_liveness_threshold() -> u64 {
    90
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_recordings_dir() -> String {
    "./recordings".to_string()
}

fn default_max_clip_seconds() -> u64 {
    60
}

fn default_samples_dir() -> String {
    "./samples".to_string()
}

fn default_files_interval() -> u64 {
    3
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Capturer {
    fn default() -> Self {
        Self {
            name: default_capturer_name(),
            capacity: default_capacity(),
            discovery_interval: default_discovery_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            liveness_threshold: default_liveness_threshold(),
            mode: Mode::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            dir: default_recordings_dir(),
            max_clip_seconds: default_max_clip_seconds(),
            window: None,
            error_store: None,
        }
    }
}

impl Default for Files {
    fn default() -> Self {
        Self {
            dir: default_samples_dir(),
            interval: default_files_interval(),
        }
    }
}

impl Capturer {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval.max(1))
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_secs(self.liveness_threshold)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

impl Recorder {
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            dir: PathBuf::from(&self.dir),
            max_length: Duration::from_secs(self.max_clip_seconds),
            window: self.window,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capturer.name.trim().is_empty() {
            anyhow::bail!("capturer name cannot be empty");
        }
        if self.capturer.capacity == 0 {
            anyhow::bail!("capturer capacity must be at least 1");
        }
        if self.capturer.liveness_threshold <= self.capturer.heartbeat_interval {
            anyhow::bail!(
                "liveness threshold ({}s) must exceed the heartbeat interval ({}s)",
                self.capturer.liveness_threshold,
                self.capturer.heartbeat_interval
            );
        }
        if self.recorder.max_clip_seconds == 0 {
            anyhow::bail!("max clip length cannot be zero");
        }
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                anyhow::bail!("camera name cannot be empty");
            }
            if camera.url.trim().is_empty() {
                anyhow::bail!("camera {} url cannot be empty", camera.name);
            }
        }
        Ok(())
    }
}
