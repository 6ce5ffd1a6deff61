use std::sync::Arc;

use pubsub::PubSub;
use storage::ClipStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentContext;
use crate::assign::{AgentLauncher, Assigner};
use crate::config::Config;
use crate::registry::Registry;
use crate::roster::Roster;
use crate::segment::clock::Clock;

pub mod agent;
pub mod assign;
pub mod config;
pub mod error;
pub mod handoff;
pub mod registry;
pub mod result;
pub mod roster;
pub mod segment;
pub mod source;

#[cfg(test)]
mod tests;

/// Run one capturer instance until `cancel` fires, then drain its agents.
pub async fn serve(
    cfg: Config,
    roster: Arc<dyn Roster>,
    store: Arc<dyn ClipStore>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    for camera in &cfg.cameras {
        roster.register_camera(camera).await?;
    }
    for topic in api::topic::ALL {
        pubsub.create_topic(topic).await?;
    }

    let registry = Registry::new();
    let ctx = AgentContext {
        capturer: cfg.capturer.name.clone(),
        mode: cfg.capturer.mode,
        recorder: cfg.recorder.clone(),
        files: cfg.files.clone(),
        store,
        pubsub,
        roster: roster.clone(),
        clock: clock.clone(),
    };
    let assigner = Assigner::new(
        cfg.capturer.name.clone(),
        cfg.capturer.capacity,
        cfg.capturer.liveness_threshold(),
        roster.clone(),
        registry.clone(),
        Arc::new(AgentLauncher::new(ctx)),
        clock.clone(),
    );

    info!(
        capturer = %cfg.capturer.name,
        capacity = cfg.capturer.capacity,
        mode = ?cfg.capturer.mode,
        "capturer started"
    );
    let discovery = tokio::spawn(assigner.run(cfg.capturer.discovery_interval(), cancel.clone()));
    let heartbeat = tokio::spawn(assign::heartbeat::run(
        cfg.capturer.name.clone(),
        cfg.capturer.capacity,
        roster.clone(),
        registry.clone(),
        clock,
        cfg.capturer.heartbeat_interval(),
        cancel.clone(),
    ));

    cancel.cancelled().await;
    let _ = discovery.await;
    let _ = heartbeat.await;

    let owned = registry.names().await;
    registry.shutdown(cfg.capturer.shutdown_grace()).await;
    for camera in owned {
        if let Err(e) = roster.release(&camera, &cfg.capturer.name).await {
            warn!(camera = %camera, "release failed: {:?}", e);
        }
    }
    info!(capturer = %cfg.capturer.name, "capturer stopped");
    Ok(())
}
