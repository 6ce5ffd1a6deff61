use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::{Camera, CapturerRecord};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Roster;
use crate::segment::clock::{Clock, SystemClock};

#[derive(Default)]
struct Inner {
    cameras: BTreeMap<String, Camera>,
    capturers: HashMap<String, CapturerRecord>,
}

/// In-process roster. Clones share state, so several assigners in one
/// process can compete for the same cameras.
///
/// By default a claim overwrites the owner unconditionally, two capturers
/// that both saw a camera unowned in the same tick will both win. With a
/// lease the first claim wins until its owner stops heartbeating, judged
/// against the same clock the heartbeats are stamped with.
#[derive(Clone)]
pub struct MemoryRoster {
    inner: Arc<RwLock<Inner>>,
    lease: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRoster {
    fn default() -> Self {
        Self {
            inner: Default::default(),
            lease: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl MemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclusive(lease: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Default::default(),
            lease: Some(lease),
            clock,
        }
    }
}

#[async_trait]
impl Roster for MemoryRoster {
    async fn register_camera(&self, camera: &Camera) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .cameras
            .entry(camera.name.clone())
            .or_insert_with(|| camera.clone());
        Ok(())
    }

    async fn cameras(&self) -> Result<Vec<Camera>> {
        let inner = self.inner.read().await;
        Ok(inner
            .cameras
            .values()
            .map(|camera| {
                let mut camera = camera.clone();
                camera.last_heartbeat = camera
                    .capturer
                    .as_ref()
                    .and_then(|owner| inner.capturers.get(owner))
                    .map(|record| record.heartbeat);
                camera
            })
            .collect())
    }

    async fn capturers(&self) -> Result<Vec<CapturerRecord>> {
        Ok(self.inner.read().await.capturers.values().cloned().collect())
    }

    async fn claim(&self, camera: &str, capturer: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let owner_alive = match (self.lease, inner.cameras.get(camera).and_then(|c| c.capturer.clone())) {
            (Some(lease), Some(owner)) if owner != capturer => {
                let lease = chrono::Duration::from_std(lease)?;
                inner
                    .capturers
                    .get(&owner)
                    .is_some_and(|record| record.is_alive(self.clock.now(), lease))
            }
            _ => false,
        };
        if owner_alive {
            return Ok(false);
        }
        let entry = inner
            .cameras
            .get_mut(camera)
            .ok_or_else(|| anyhow!("unknown camera {}", camera))?;
        entry.capturer = Some(capturer.to_string());
        Ok(true)
    }

    async fn release(&self, camera: &str, capturer: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.cameras.get_mut(camera) {
            if entry.capturer.as_deref() == Some(capturer) {
                entry.capturer = None;
            }
        }
        Ok(())
    }

    async fn heartbeat(&self, record: &CapturerRecord, _owned: &[String]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.capturers.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn update_dimensions(&self, camera: &str, width: u32, height: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.cameras.get_mut(camera) {
            entry.capture_width = width;
            entry.capture_height = height;
        }
        Ok(())
    }
}
