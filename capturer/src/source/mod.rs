pub mod annexb;
pub mod channel;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::Sender;

use api::Camera;

use crate::error::AppError;

pub use annexb::AnnexbFileSource;
pub use channel::ChannelSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// One access unit as delivered by the transport.
#[derive(Clone, Debug)]
pub struct Packet {
    pub idx: usize,
    pub codec: String,
    pub kind: MediaKind,
    pub is_keyframe: bool,
    /// Monotonic decode timestamp
    pub dts: Duration,
    /// Presentation offset from `dts`
    pub cts: Duration,
    /// Annex-B payload
    pub data: Bytes,
}

impl Packet {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Video stream announced by the transport after connect.
#[derive(Clone, Debug, Default)]
pub struct VideoStream {
    pub name: String,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
    pub vps: Option<Bytes>,
    pub is_back_channel: bool,
}

impl VideoStream {
    /// Out-of-band parameter sets in VPS, SPS, PPS order.
    pub fn parameter_sets(&self) -> Vec<Bytes> {
        [&self.vps, &self.sps, &self.pps]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Transport client. The only obligation is a well-formed packet sequence with
/// correct keyframe flags and cooperative pause/resume.
#[async_trait]
pub trait StreamSource: Send {
    async fn connect(&mut self) -> Result<()>;

    fn video_streams(&self) -> Vec<VideoStream>;

    /// Begin delivering packets. Returns once delivery is running.
    async fn start(&mut self, packets: Sender<Packet>, errors: Sender<AppError>) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    async fn close(&mut self) -> Result<()>;
}

/// Pick a source implementation by camera URL scheme.
pub fn create_source(camera: &Camera) -> Result<Box<dyn StreamSource>> {
    let url = url::Url::parse(&camera.url)
        .map_err(|e| anyhow::anyhow!("camera {} url {}: {}", camera.name, camera.url, e))?;
    match url.scheme() {
        "file" => Ok(Box::new(AnnexbFileSource::from_url(&url)?)),
        scheme => anyhow::bail!(
            "camera {}: no stream source for scheme {}",
            camera.name,
            scheme
        ),
    }
}
