use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A camera in the shared roster.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Camera {
    pub name: String,
    /// Stream address handed to the stream source.
    pub url: String,
    pub region: String,
    pub location: String,
    pub priority: i64,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Maximum clip length in seconds, 0 falls back to the recorder default.
    pub max_length_recording: u64,
    pub analytics: Vec<String>,
    pub alert_types: Vec<String>,
    pub media_indexer_types: Vec<String>,
    /// Current owning capturer, if any.
    pub capturer: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Liveness and load record a capturer instance publishes on every heartbeat.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturerRecord {
    pub name: String,
    pub capacity: usize,
    pub heartbeat: DateTime<Utc>,
    pub agents: usize,
}

impl CapturerRecord {
    pub fn is_alive(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.heartbeat >= now - threshold
    }
}
