//! Clip handoff: upload, publish, delete. Each step runs regardless of the
//! previous one and failures are only logged. There is no retry and no
//! compensating action, a clip whose upload failed is still announced with an
//! empty cloud reference.

use std::sync::Arc;

use api::{topic, Clip};
use pubsub::PubSub;
use storage::ClipStore;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, warn};

/// What happened to one clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handoff {
    pub uploaded: bool,
    pub published: bool,
    pub deleted: bool,
}

pub async fn handoff(mut clip: Clip, store: &dyn ClipStore, pubsub: &dyn PubSub) -> Handoff {
    let mut outcome = Handoff::default();

    match store.store_recording_clip(&clip).await {
        Ok(reference) => {
            clip.cloud_reference = reference;
            clip.storage_provider = store.provider().to_string();
            outcome.uploaded = true;
        }
        Err(e) => error!(clip = %clip.id, camera = %clip.camera, "[handoff] upload failed: {:?}", e),
    }

    match clip.to_json() {
        Ok(payload) => match pubsub.publish(topic::RECORDINGS, payload).await {
            Ok(()) => outcome.published = true,
            Err(e) => error!(clip = %clip.id, "[handoff] publish failed: {:?}", e),
        },
        Err(e) => error!(clip = %clip.id, "[handoff] encode failed: {:?}", e),
    }

    match tokio::fs::remove_file(&clip.local_reference).await {
        Ok(()) => outcome.deleted = true,
        Err(e) => warn!(
            clip = %clip.id,
            file = %clip.local_reference,
            "[handoff] delete failed: {:?}",
            e
        ),
    }

    info!(
        clip = %clip.id,
        camera = %clip.camera,
        reference = %clip.cloud_reference,
        "[handoff] {:?}",
        outcome
    );
    outcome
}

/// Hand off every clip the segmenter emits, in order, until the channel closes.
pub async fn run(mut clips: Receiver<Clip>, store: Arc<dyn ClipStore>, pubsub: Arc<dyn PubSub>) {
    while let Some(clip) = clips.recv().await {
        handoff(clip, store.as_ref(), pubsub.as_ref()).await;
    }
}
