//! Per-camera agent: stream source, segmenter, error sink and clip handoff,
//! steered by a command channel.

pub mod files;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use api::{Camera, Command};
use pubsub::PubSub;
use storage::ClipStore;
use tokio::sync::mpsc::{self, Receiver};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Files, Mode, Recorder};
use crate::error::AppError;
use crate::handoff;
use crate::result::Result;
use crate::roster::Roster;
use crate::segment::clock::Clock;
use crate::segment::Segmenter;
use crate::source::{create_source, StreamSource};

/// Bound of the packet, error and clip channels inside an agent.
pub const CHANNEL_CAPACITY: usize = 10;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(20);

/// Everything an agent shares with its capturer.
#[derive(Clone)]
pub struct AgentContext {
    pub capturer: String,
    pub mode: Mode,
    pub recorder: Recorder,
    pub files: Files,
    pub store: Arc<dyn ClipStore>,
    pub pubsub: Arc<dyn PubSub>,
    pub roster: Arc<dyn Roster>,
    pub clock: Arc<dyn Clock>,
}

/// Run the agent for `camera` until cancelled or a fatal error.
pub async fn run(
    ctx: AgentContext,
    camera: Camera,
    commands: Receiver<Command>,
    cancel: CancellationToken,
) -> Result<()> {
    match ctx.mode {
        Mode::Streaming => {
            let source = create_source(&camera).map_err(|e| AppError::config(format!("{:#}", e)))?;
            run_streaming(ctx, camera, source, commands, cancel).await
        }
        Mode::Files => {
            run_files(ctx, camera, commands, cancel).await;
            Ok(())
        }
    }
}

pub async fn run_streaming(
    ctx: AgentContext,
    mut camera: Camera,
    mut source: Box<dyn StreamSource>,
    mut commands: Receiver<Command>,
    cancel: CancellationToken,
) -> Result<()> {
    source.connect().await?;

    let stream = source
        .video_streams()
        .into_iter()
        .find(|s| !s.is_back_channel);
    if let Some(stream) = &stream {
        info!(
            camera = %camera.name,
            codec = %stream.codec,
            "[agent] video stream {}x{}",
            stream.width,
            stream.height
        );
        if stream.width > 0 && stream.height > 0 {
            camera.capture_width = stream.width;
            camera.capture_height = stream.height;
            if let Err(e) = ctx
                .roster
                .update_dimensions(&camera.name, stream.width, stream.height)
                .await
            {
                warn!(camera = %camera.name, "[agent] unable to update dimensions: {:?}", e);
            }
        }
    }

    let (packets_tx, packets_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (clips_tx, clips_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let sink = tokio::spawn(sink::run(
        camera.name.clone(),
        errors_rx,
        ctx.store.clone(),
        ctx.recorder.error_store.clone(),
        ctx.clock.clone(),
    ));
    let handoff = tokio::spawn(handoff::run(clips_rx, ctx.store.clone(), ctx.pubsub.clone()));

    let mut segmenter = Segmenter::new(
        camera.clone(),
        ctx.capturer.clone(),
        ctx.recorder.segmenter(),
        ctx.clock.clone(),
    );
    if let Some(stream) = stream {
        segmenter = segmenter.with_stream(stream);
    }
    let segment_cancel = cancel.child_token();
    let mut segment = tokio::spawn(segmenter.run(
        packets_rx,
        clips_tx,
        errors_tx.clone(),
        segment_cancel.clone(),
    ));

    let mut segment_done = false;
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    ticker.tick().await;

    let outcome = match source.start(packets_tx, errors_tx.clone()).await {
        Err(e) => Err(AppError::from(e)),
        Ok(()) => loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                command = commands.recv() => {
                    let Some(command) = command else { break Ok(()) };
                    if command.suspends() {
                        source.pause();
                    } else {
                        source.resume();
                    }
                    info!(camera = %camera.name, "[agent] {} command processed", command);
                }
                _ = ticker.tick() => {
                    info!(camera = %camera.name, capturer = %ctx.capturer, "[agent] housekeeping");
                }
                res = &mut segment => {
                    segment_done = true;
                    break match res {
                        Ok(res) => res,
                        Err(e) => Err(AppError::from(e)),
                    };
                }
            }
        },
    };

    segment_cancel.cancel();
    if !segment_done {
        match segment.await {
            Ok(Err(e)) => {
                let _ = errors_tx.send(e).await;
            }
            Err(e) => warn!(camera = %camera.name, "[agent] segmenter task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = source.close().await {
        warn!(camera = %camera.name, "[agent] close failed: {:?}", e);
    }
    drop(errors_tx);

    let _ = handoff.await;
    let _ = sink.await;

    match &outcome {
        Ok(()) => info!(camera = %camera.name, "[agent] stopped"),
        Err(e) => error!(camera = %camera.name, "[agent] stopped: {}", e),
    }
    outcome
}

async fn run_files(
    ctx: AgentContext,
    camera: Camera,
    commands: Receiver<Command>,
    cancel: CancellationToken,
) {
    let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (clips_tx, clips_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let sink = tokio::spawn(sink::run(
        camera.name.clone(),
        errors_rx,
        ctx.store.clone(),
        ctx.recorder.error_store.clone(),
        ctx.clock.clone(),
    ));
    let handoff = tokio::spawn(handoff::run(clips_rx, ctx.store.clone(), ctx.pubsub.clone()));

    files::run(ctx, camera, commands, clips_tx, errors_tx, cancel).await;

    let _ = handoff.await;
    let _ = sink.await;
}
