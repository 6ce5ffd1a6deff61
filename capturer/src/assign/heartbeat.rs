use std::sync::Arc;
use std::time::Duration;

use api::CapturerRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::registry::Registry;
use crate::roster::Roster;
use crate::segment::clock::Clock;

/// Publish this capturer's liveness record on every tick, starting now.
pub async fn run(
    name: String,
    capacity: usize,
    roster: Arc<dyn Roster>,
    registry: Registry,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let owned = registry.names().await;
                let record = CapturerRecord {
                    name: name.clone(),
                    capacity,
                    heartbeat: clock.now(),
                    agents: owned.len(),
                };
                match roster.heartbeat(&record, &owned).await {
                    Ok(()) => debug!(capturer = %name, agents = record.agents, "[heartbeat] sent"),
                    Err(e) => error!(capturer = %name, "[heartbeat] failed: {:?}", e),
                }
            }
        }
    }
}
