pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api::{Camera, CapturerRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::memory::MemoryRoster;
pub use self::redis::RedisRoster;
use crate::segment::clock::Clock;

/// Shared camera roster and capturer liveness store.
#[async_trait]
pub trait Roster: Send + Sync {
    /// Add a camera unless it is already known.
    async fn register_camera(&self, camera: &Camera) -> Result<()>;

    /// Every camera with its current owner and the owner's last heartbeat.
    async fn cameras(&self) -> Result<Vec<Camera>>;

    async fn capturers(&self) -> Result<Vec<CapturerRecord>>;

    /// Write `capturer` as the owner of `camera`, false when the backend refused.
    async fn claim(&self, camera: &str, capturer: &str) -> Result<bool>;

    /// Drop ownership if `capturer` still holds it.
    async fn release(&self, camera: &str, capturer: &str) -> Result<()>;

    /// Publish liveness and refresh ownership of `owned` cameras.
    async fn heartbeat(&self, record: &CapturerRecord, owned: &[String]) -> Result<()>;

    /// Record frame dimensions discovered from the stream.
    async fn update_dimensions(&self, camera: &str, width: u32, height: u32) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RosterConfig {
    /// Process-local roster
    Memory {
        /// First writer wins instead of last writer wins
        #[serde(default)]
        exclusive: bool,
    },
    Redis {
        /// e.g. `redis://localhost:6379`
        url: String,
    },
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self::Memory { exclusive: false }
    }
}

/// `lease` bounds how long an ownership survives without a heartbeat.
pub async fn roster_from_config(
    config: &RosterConfig,
    lease: Duration,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Roster>> {
    Ok(match config {
        RosterConfig::Memory { exclusive: false } => Arc::new(MemoryRoster::new()),
        RosterConfig::Memory { exclusive: true } => Arc::new(MemoryRoster::exclusive(lease, clock)),
        RosterConfig::Redis { url } => Arc::new(RedisRoster::new(url, lease).await?),
    })
}
