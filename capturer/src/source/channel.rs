use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Packet, StreamSource, VideoStream};
use crate::error::AppError;

/// Source fed from an in-process channel, used to drive agents without a camera.
pub struct ChannelSource {
    streams: Vec<VideoStream>,
    input: Option<Receiver<Packet>>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl ChannelSource {
    pub fn new(streams: Vec<VideoStream>, input: Receiver<Packet>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            streams,
            input: Some(input),
            paused,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe pause/resume requests.
    pub fn paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }
}

#[async_trait]
impl StreamSource for ChannelSource {
    async fn connect(&mut self) -> Result<()> {
        if self.input.is_none() {
            anyhow::bail!("channel source already consumed");
        }
        Ok(())
    }

    fn video_streams(&self) -> Vec<VideoStream> {
        self.streams.clone()
    }

    async fn start(&mut self, packets: Sender<Packet>, _errors: Sender<AppError>) -> Result<()> {
        let mut input = self
            .input
            .take()
            .ok_or_else(|| anyhow::anyhow!("channel source already started"))?;
        let mut paused = self.paused.subscribe();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let packet = tokio::select! {
                    _ = cancel.cancelled() => break,
                    packet = input.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                };
                while *paused.borrow_and_update() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        changed = paused.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                if packets.send(packet).await.is_err() {
                    break;
                }
            }
            debug!("[source] channel closed");
        });
        Ok(())
    }

    fn pause(&self) {
        self.paused.send_replace(true);
    }

    fn resume(&self) {
        self.paused.send_replace(false);
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.input = None;
        Ok(())
    }
}
