use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::{Camera, Clip, Command};
use chrono::Duration as TimeDelta;
use rand::seq::IndexedRandom;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::AgentContext;
use crate::error::AppError;

/// Copy one random sample clip into the recordings directory.
pub async fn produce_clip(
    samples: &Path,
    recordings: &Path,
    capturer: &str,
    camera: &Camera,
    ctx: &AgentContext,
    span: Duration,
) -> Result<Clip> {
    let pattern = samples.join("*.mp4");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| anyhow!("non utf-8 samples dir {}", samples.display()))?;
    let candidates: Vec<PathBuf> = glob::glob(pattern)?.filter_map(|p| p.ok()).collect();
    let sample = candidates
        .choose(&mut rand::rng())
        .ok_or_else(|| anyhow!("no sample clips in {}", samples.display()))?;

    let now = ctx.clock.now();
    tokio::fs::create_dir_all(recordings).await?;
    let target = recordings.join(format!("{}_{}.mp4", camera.name, now.timestamp_millis()));
    tokio::fs::copy(sample, &target).await?;
    debug!(camera = %camera.name, sample = %sample.display(), "[files] sample copied");

    let begin = now - TimeDelta::from_std(span)?;
    Ok(Clip::new(
        camera,
        capturer,
        target.to_string_lossy().into_owned(),
        0,
        begin,
        now,
    ))
}

/// Agent that replays sample clips instead of reading a camera.
pub async fn run(
    ctx: AgentContext,
    camera: Camera,
    mut commands: Receiver<Command>,
    clips: Sender<Clip>,
    errors: Sender<AppError>,
    cancel: CancellationToken,
) {
    let samples = PathBuf::from(&ctx.files.dir);
    let recordings = PathBuf::from(&ctx.recorder.dir);
    let span = Duration::from_secs(ctx.files.interval.max(1));
    let mut ticker = tokio::time::interval(span);
    ticker.tick().await;
    let mut paused = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                paused = command.suspends();
                info!(camera = %camera.name, "[files] {} command processed", command);
            }
            _ = ticker.tick() => {
                if paused {
                    continue;
                }
                match produce_clip(&samples, &recordings, &ctx.capturer, &camera, &ctx, span).await {
                    Ok(clip) => {
                        if clips.send(clip).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = errors.send(AppError::from(e)).await;
                    }
                }
            }
        }
    }
    debug!(camera = %camera.name, "[files] agent stopped");
}
