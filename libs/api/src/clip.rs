use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{format_time, Camera};

pub const CLIP_TYPE_METADATA: i64 = 0;
pub const CLIP_TYPE_ALERT: i64 = 1;

/// A bounded media file plus the routing metadata that travels with it.
///
/// Every stage decodes its own copy, enriches it and re-serializes the same
/// flat shape, so field names and order are part of the wire contract.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Clip {
    pub id: String,
    pub local_reference: String,
    pub cloud_reference: String,
    pub storage_provider: String,
    pub capturer: String,
    pub camera: String,
    pub region: String,
    pub location: String,
    pub priority: i64,
    pub analytics: Vec<String>,
    pub alert_types: Vec<String>,
    pub media_indexer_types: Vec<String>,
    pub frames: i64,
    pub begin_time: String,
    pub end_time: String,
    pub tags: Vec<String>,
    pub tags_count: i64,
    pub alerts_count: i64,
    pub clip_type: i64,
    pub model_invoker: String,
    pub model_invocation_begin_time: String,
    pub model_invocation_end_time: String,
    pub media_indexer_begin_time: String,
    pub media_indexer_end_time: String,
    pub alert_invocation_begin_time: String,
    pub alert_invocation_end_time: String,
}

impl Clip {
    /// Build a freshly closed clip, copying routing fields from the camera.
    pub fn new(
        camera: &Camera,
        capturer: &str,
        local_reference: String,
        frames: i64,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            local_reference,
            capturer: capturer.to_string(),
            camera: camera.name.clone(),
            region: camera.region.clone(),
            location: camera.location.clone(),
            priority: camera.priority,
            analytics: camera.analytics.clone(),
            alert_types: camera.alert_types.clone(),
            media_indexer_types: camera.media_indexer_types.clone(),
            frames,
            begin_time: format_time(begin),
            end_time: format_time(end),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    /// Replace detected tags and keep the count in step.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags_count = tags.len() as i64;
        self.tags = tags;
    }

    /// File name component of the local reference.
    pub fn file_name(&self) -> &str {
        self.local_reference
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.local_reference)
    }
}
