//! Per-camera recording state machine.
//!
//! Idle ──keyframe (inside window)──▶ Recording
//! Recording ──keyframe after max length──▶ close clip, reopen on the same keyframe
//!
//! Clips therefore always start on a keyframe and the max length is a ceiling
//! reached at the first keyframe at or after the deadline.

pub mod clock;
pub mod codec;
pub mod mp4;
pub mod window;


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api::{Camera, Clip};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::result::Result;
use crate::source::{Packet, VideoStream};
use clock::Clock;
use codec::{create_video_adapter, CodecAdapter, VideoCodec};
use mp4::{Fmp4Writer, Mp4File};
use window::RecordingWindow;

/// Frame count of a freshly opened clip, header plus first sample.
const OPEN_FRAMES: i64 = 2;

#[derive(Clone, Debug)]
pub struct SegmenterConfig {
    /// Directory local clip files are written to
    pub dir: PathBuf,
    pub max_length: Duration,
    pub window: Option<RecordingWindow>,
}

struct OpenClip {
    file: Mp4File,
    started: DateTime<Utc>,
    frames: i64,
}

enum State {
    Idle,
    Recording(OpenClip),
}

pub struct Segmenter {
    camera: Camera,
    capturer: String,
    config: SegmenterConfig,
    clock: Arc<dyn Clock>,
    codec: Option<VideoCodec>,
    adapter: Option<Box<dyn CodecAdapter>>,
    /// Out-of-band parameter sets and dimensions announced by the source
    stream: Option<VideoStream>,
    state: State,
    /// Reopen failure held back so the clip it follows is still emitted
    deferred: Option<AppError>,
}

impl Segmenter {
    pub fn new(
        camera: Camera,
        capturer: impl Into<String>,
        config: SegmenterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            camera,
            capturer: capturer.into(),
            config,
            clock,
            codec: None,
            adapter: None,
            stream: None,
            state: State::Idle,
            deferred: None,
        }
    }

    pub fn with_stream(mut self, stream: VideoStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording(_))
    }

    /// Error from reopening on the keyframe that closed the last clip.
    pub fn take_error(&mut self) -> Option<AppError> {
        self.deferred.take()
    }

    fn max_length(&self) -> chrono::Duration {
        let max = if self.camera.max_length_recording > 0 {
            Duration::from_secs(self.camera.max_length_recording)
        } else {
            self.config.max_length
        };
        chrono::Duration::from_std(max).unwrap_or(chrono::Duration::MAX)
    }

    /// Feed one packet, returns a clip when this packet closed one.
    ///
    /// When the closing keyframe cannot start the next clip the closed clip
    /// is still returned and the failure waits in [`Segmenter::take_error`].
    pub async fn push(&mut self, packet: Packet) -> Result<Option<Clip>> {
        if !packet.is_video() {
            return Ok(None);
        }

        match &self.state {
            State::Idle => {
                if packet.is_keyframe {
                    self.open(&packet).await?;
                }
                Ok(None)
            }
            State::Recording(clip) => {
                let elapsed = self.clock.now() - clip.started;
                if packet.is_keyframe && elapsed >= self.max_length() {
                    let closed = self.close().await?;
                    if let Err(e) = self.open(&packet).await {
                        warn!(camera = %self.camera.name, "[segmenter] next clip not opened: {}", e);
                        self.deferred = Some(e);
                    }
                    Ok(Some(closed))
                } else {
                    self.append(&packet).await?;
                    Ok(None)
                }
            }
        }
    }

    fn adapter_for(&mut self, codec_name: &str) -> Result<&mut Box<dyn CodecAdapter>> {
        let codec =
            VideoCodec::from_name(codec_name).ok_or_else(|| AppError::unsupported_codec(codec_name))?;
        if self.codec != Some(codec) || self.adapter.is_none() {
            let mut adapter = create_video_adapter(codec);
            if let Some(stream) = &self.stream {
                adapter.seed(&stream.parameter_sets());
            }
            self.codec = Some(codec);
            self.adapter = Some(adapter);
        }
        self.adapter
            .as_mut()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("codec adapter missing")))
    }

    async fn open(&mut self, packet: &Packet) -> Result<()> {
        let now = self.clock.now();
        if let Some(window) = &self.config.window {
            if !window.contains(now) {
                return Ok(());
            }
        }

        let adapter = self.adapter_for(&packet.codec)?;
        let (payload, _, _) = adapter.convert_frame(&packet.data);
        let (Some(codec_config), Some(codec_string)) = (adapter.codec_config(), adapter.codec_string())
        else {
            return Err(AppError::protocol(format!(
                "{} keyframe without parameter sets",
                packet.codec
            )));
        };
        let timescale = adapter.timescale();
        let (mut width, mut height) = (adapter.width(), adapter.height());
        if width == 0 || height == 0 {
            (width, height) = match &self.stream {
                Some(s) if s.width > 0 && s.height > 0 => (s.width, s.height),
                _ => (self.camera.capture_width, self.camera.capture_height),
            };
        }

        tokio::fs::create_dir_all(&self.config.dir).await?;
        let path = self
            .config
            .dir
            .join(format!("{}_{}.mp4", self.camera.name, now.timestamp_millis()));
        let writer = Fmp4Writer::new(timescale, width, height, codec_string, codec_config);
        let mut file = Mp4File::create(&path, writer).await?;
        file.write_sample(ticks(packet.dts, timescale), true, payload)
            .await?;

        info!(
            camera = %self.camera.name,
            file = %path.display(),
            "[segmenter] recording started"
        );
        self.state = State::Recording(OpenClip {
            file,
            started: now,
            frames: OPEN_FRAMES,
        });
        Ok(())
    }

    async fn append(&mut self, packet: &Packet) -> Result<()> {
        let adapter = self.adapter_for(&packet.codec)?;
        let (payload, _, _) = adapter.convert_frame(&packet.data);
        let timescale = adapter.timescale();
        let State::Recording(clip) = &mut self.state else {
            return Ok(());
        };
        if payload.is_empty() {
            return Err(AppError::protocol("empty access unit"));
        }
        if let Err(e) = clip
            .file
            .write_sample(ticks(packet.dts, timescale), packet.is_keyframe, payload)
            .await
        {
            warn!(camera = %self.camera.name, "[segmenter] clip abandoned: {}", e);
            self.state = State::Idle;
            return Err(e);
        }
        clip.frames += 1;
        Ok(())
    }

    /// Write the trailer and build the clip record.
    async fn close(&mut self) -> Result<Clip> {
        let State::Recording(clip) = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(AppError::Internal(anyhow::anyhow!("no open clip")));
        };
        let end = self.clock.now();
        let path = clip.file.finish().await?;
        let frames = clip.frames + 1;
        info!(
            camera = %self.camera.name,
            file = %path.display(),
            frames,
            "[segmenter] clip saved"
        );
        Ok(Clip::new(
            &self.camera,
            &self.capturer,
            path.to_string_lossy().into_owned(),
            frames,
            clip.started,
            end,
        ))
    }

    /// Forced close when the packet source ends. The trailer is always
    /// written; a clip is only emitted when a full max length had elapsed.
    pub async fn finish(&mut self) -> Result<Option<Clip>> {
        let State::Recording(clip) = &self.state else {
            return Ok(None);
        };
        let complete = self.clock.now() - clip.started >= self.max_length();
        let closed = self.close().await?;
        if complete {
            Ok(Some(closed))
        } else {
            debug!(
                camera = %self.camera.name,
                file = %closed.local_reference,
                "[segmenter] short clip closed on shutdown"
            );
            Ok(None)
        }
    }

    /// Consume packets until cancelled, the source ends or a fatal error.
    pub async fn run(
        mut self,
        mut packets: Receiver<Packet>,
        clips: Sender<Clip>,
        errors: Sender<AppError>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                packet = packets.recv() => {
                    let Some(packet) = packet else {
                        debug!(camera = %self.camera.name, "[segmenter] packet stream ended");
                        break Ok(());
                    };
                    let failure = match self.push(packet).await {
                        Ok(Some(clip)) => {
                            if clips.send(clip).await.is_err() {
                                warn!(camera = %self.camera.name, "[segmenter] clip receiver dropped");
                                break Ok(());
                            }
                            self.take_error()
                        }
                        Ok(None) => None,
                        Err(e) => Some(e),
                    };
                    match failure {
                        Some(e) if e.is_fatal() => break Err(e),
                        Some(e) => {
                            let _ = errors.send(e).await;
                        }
                        None => {}
                    }
                }
            }
        };

        match self.finish().await {
            Ok(Some(clip)) => {
                let _ = clips.send(clip).await;
            }
            Ok(None) => {}
            Err(e) => {
                let _ = errors.send(e).await;
            }
        }
        outcome
    }
}

fn ticks(dts: Duration, timescale: u32) -> u64 {
    (dts.as_nanos() * timescale as u128 / 1_000_000_000) as u64
}
