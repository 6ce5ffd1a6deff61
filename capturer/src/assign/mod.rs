//! Camera assignment without a central scheduler. Every capturer runs the
//! same discovery loop: cameras without a live owner are claimed until the
//! capturer is at capacity. Liveness comes from the heartbeat loop.

pub mod heartbeat;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api::{Camera, CapturerRecord};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{self, AgentContext, CHANNEL_CAPACITY};
use crate::registry::{AgentHandle, Registry};
use crate::roster::Roster;
use crate::segment::clock::Clock;

/// Starts the agent for a claimed camera.
pub trait Launcher: Send + Sync {
    fn launch(&self, camera: Camera, cancel: CancellationToken) -> AgentHandle;
}

pub struct AgentLauncher {
    ctx: AgentContext,
}

impl AgentLauncher {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

impl Launcher for AgentLauncher {
    fn launch(&self, camera: Camera, cancel: CancellationToken) -> AgentHandle {
        let (commands, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let ctx = self.ctx.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let name = camera.name.clone();
            if let Err(e) = agent::run(ctx, camera, rx, token).await {
                error!(camera = %name, fatal = e.is_fatal(), "[assign] agent exited: {}", e);
            }
        });
        AgentHandle {
            commands,
            cancel,
            task,
        }
    }
}

/// Cameras this capturer should claim, highest priority first.
///
/// A camera is a candidate when it is not running here and its owner is
/// missing or has not heartbeated within `liveness`.
pub fn plan(
    me: &str,
    capacity: usize,
    running: &HashSet<String>,
    cameras: &[Camera],
    capturers: &[CapturerRecord],
    now: DateTime<Utc>,
    liveness: chrono::Duration,
) -> Vec<Camera> {
    let alive: HashMap<&str, bool> = capturers
        .iter()
        .map(|c| (c.name.as_str(), c.is_alive(now, liveness)))
        .collect();

    let mut ordered: Vec<&Camera> = cameras.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut free = capacity.saturating_sub(running.len());
    let mut claims = Vec::new();
    for camera in ordered {
        if free == 0 {
            break;
        }
        if running.contains(&camera.name) {
            continue;
        }
        let owner_alive = match camera.capturer.as_deref() {
            None => false,
            // stale ownership left behind by an earlier run of this capturer
            Some(owner) if owner == me => false,
            Some(owner) => alive.get(owner).copied().unwrap_or_else(|| {
                camera
                    .last_heartbeat
                    .is_some_and(|beat| beat >= now - liveness)
            }),
        };
        if owner_alive {
            continue;
        }
        claims.push(camera.clone());
        free -= 1;
    }
    claims
}

pub struct Assigner {
    name: String,
    capacity: usize,
    liveness: Duration,
    roster: Arc<dyn Roster>,
    registry: Registry,
    launcher: Arc<dyn Launcher>,
    clock: Arc<dyn Clock>,
}

impl Assigner {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        liveness: Duration,
        roster: Arc<dyn Roster>,
        registry: Registry,
        launcher: Arc<dyn Launcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            capacity,
            liveness,
            roster,
            registry,
            launcher,
            clock,
        }
    }

    /// One reconciliation pass, returns the cameras claimed.
    pub async fn discover_once(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        for camera in self.registry.reap().await {
            if let Err(e) = self.roster.release(&camera, &self.name).await {
                warn!(camera = %camera, "[assign] release failed: {:?}", e);
            }
        }

        let cameras = self.roster.cameras().await?;
        let capturers = self.roster.capturers().await?;
        let running: HashSet<String> = self.registry.names().await.into_iter().collect();
        let candidates = plan(
            &self.name,
            self.capacity,
            &running,
            &cameras,
            &capturers,
            self.clock.now(),
            chrono::Duration::from_std(self.liveness)?,
        );

        let mut claimed = Vec::new();
        for camera in candidates {
            if !self.roster.claim(&camera.name, &self.name).await? {
                debug!(camera = %camera.name, capturer = %self.name, "[assign] claim refused");
                continue;
            }
            let name = camera.name.clone();
            let handle = self.launcher.launch(camera, cancel.child_token());
            if self.registry.insert(&name, handle).await {
                info!(camera = %name, capturer = %self.name, "[assign] camera claimed");
                claimed.push(name);
            }
        }
        Ok(claimed)
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.discover_once(&cancel).await {
                        error!(capturer = %self.name, "[assign] discovery failed: {:?}", e);
                    }
                }
            }
        }
        debug!(capturer = %self.name, "[assign] discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(name: &str, owner: Option<&str>, priority: i64) -> Camera {
        Camera {
            name: name.to_string(),
            url: format!("file:///tmp/{name}.h264"),
            priority,
            capturer: owner.map(str::to_string),
            ..Default::default()
        }
    }

    fn record(name: &str, now: DateTime<Utc>, age: i64) -> CapturerRecord {
        CapturerRecord {
            name: name.to_string(),
            capacity: 4,
            heartbeat: now - chrono::Duration::seconds(age),
            agents: 1,
        }
    }

    #[test]
    fn test_plan_skips_live_owner_and_takes_orphans() {
        let now = Utc::now();
        let cameras = vec![
            camera("cam-1", Some("b"), 0),
            camera("cam-2", Some("c"), 0),
            camera("cam-3", None, 0),
        ];
        let capturers = vec![record("b", now, 5), record("c", now, 500)];
        let claims = plan(
            "a",
            4,
            &HashSet::new(),
            &cameras,
            &capturers,
            now,
            chrono::Duration::seconds(60),
        );
        let names: Vec<_> = claims.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cam-2", "cam-3"]);
    }

    #[test]
    fn test_plan_respects_capacity_and_priority() {
        let now = Utc::now();
        let cameras = vec![
            camera("low", None, 1),
            camera("high", None, 9),
            camera("mid", None, 5),
            camera("mine", Some("a"), 7),
        ];
        let running: HashSet<String> = ["mine".to_string()].into_iter().collect();
        let claims = plan(
            "a",
            3,
            &running,
            &cameras,
            &[],
            now,
            chrono::Duration::seconds(60),
        );
        let names: Vec<_> = claims.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid"]);

        let full = plan("a", 1, &running, &cameras, &[], now, chrono::Duration::seconds(60));
        assert!(full.is_empty());
    }

    #[test]
    fn test_plan_unknown_owner_uses_camera_heartbeat() {
        let now = Utc::now();
        let mut fresh = camera("cam-1", Some("gone"), 0);
        fresh.last_heartbeat = Some(now - chrono::Duration::seconds(1));
        let stale = camera("cam-2", Some("gone"), 0);
        let claims = plan(
            "a",
            4,
            &HashSet::new(),
            &[fresh, stale],
            &[],
            now,
            chrono::Duration::seconds(60),
        );
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].name, "cam-2");
    }
}
