use std::sync::Arc;

use storage::ClipStore;
use tokio::sync::mpsc::Receiver;
use tracing::{error, warn};

use crate::error::AppError;
use crate::segment::clock::Clock;

/// Drain an agent's error channel. Errors are logged and, with a store
/// name configured, kept as `{camera}:{unix_ms}` key/value records.
pub async fn run(
    camera: String,
    mut errors: Receiver<AppError>,
    store: Arc<dyn ClipStore>,
    error_store: Option<String>,
    clock: Arc<dyn Clock>,
) -> usize {
    let mut count = 0;
    while let Some(err) = errors.recv().await {
        count += 1;
        warn!(camera = %camera, "[agent] {}", err);
        if let Some(name) = &error_store {
            let key = format!("{}:{}", camera, clock.now().timestamp_millis());
            if let Err(e) = store.store_key_value(name, &key, &err.to_string()).await {
                error!(camera = %camera, "[agent] unable to store error: {:?}", e);
            }
        }
    }
    count
}
