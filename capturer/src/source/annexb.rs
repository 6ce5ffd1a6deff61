use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::Sender;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MediaKind, Packet, StreamSource, VideoStream};
use crate::error::AppError;
use crate::segment::codec::{create_video_adapter, split_annexb, VideoCodec};

const DEFAULT_FPS: u32 = 25;

/// Cursor over the NAL units of a raw elementary stream.
struct Decoder {
    codec: VideoCodec,
    data: Bytes,
    nalus: Vec<(usize, usize)>,
    cursor: usize,
}

impl Decoder {
    fn new(codec: VideoCodec, data: Bytes) -> Self {
        let base = data.as_ptr() as usize;
        let nalus = split_annexb(&data)
            .into_iter()
            .map(|n| {
                let start = n.as_ptr() as usize - base;
                (start, start + n.len())
            })
            .collect();
        Self {
            codec,
            data,
            nalus,
            cursor: 0,
        }
    }

    fn nalu(&self, i: usize) -> &[u8] {
        let (start, end) = self.nalus[i];
        &self.data[start..end]
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Next access unit as Annex-B plus its random access flag.
    /// Pictures are assumed to be carried in a single slice.
    fn next_access_unit(&mut self) -> Option<(Bytes, bool, bool)> {
        let mut au = Vec::new();
        let mut has_vcl = false;
        let mut keyframe = false;
        while self.cursor < self.nalus.len() && !has_vcl {
            let nalu = self.nalu(self.cursor);
            has_vcl = self.codec.is_vcl(nalu);
            keyframe |= self.codec.is_random_access(nalu);
            au.extend_from_slice(&[0, 0, 0, 1]);
            au.extend_from_slice(nalu);
            self.cursor += 1;
        }
        if au.is_empty() {
            None
        } else {
            Some((Bytes::from(au), keyframe, has_vcl))
        }
    }

    /// Parameter sets and dimensions from the NAL units ahead of the first picture.
    fn describe(&self) -> VideoStream {
        let mut adapter = create_video_adapter(self.codec);
        let mut stream = VideoStream {
            name: "video".to_string(),
            codec: self.codec.name().to_string(),
            ..Default::default()
        };
        for i in 0..self.nalus.len() {
            let nalu = self.nalu(i);
            if self.codec.is_vcl(nalu) {
                break;
            }
            let slot = match (self.codec, nalu[0]) {
                (VideoCodec::H264, h) if h & 0x1F == 7 => &mut stream.sps,
                (VideoCodec::H264, h) if h & 0x1F == 8 => &mut stream.pps,
                (VideoCodec::H265, h) if (h >> 1) & 0x3F == 32 => &mut stream.vps,
                (VideoCodec::H265, h) if (h >> 1) & 0x3F == 33 => &mut stream.sps,
                (VideoCodec::H265, h) if (h >> 1) & 0x3F == 34 => &mut stream.pps,
                _ => continue,
            };
            slot.get_or_insert_with(|| Bytes::copy_from_slice(nalu));
        }
        adapter.seed(&stream.parameter_sets());
        stream.width = adapter.width();
        stream.height = adapter.height();
        stream
    }
}

/// Paced playback of a raw H.264/H.265 elementary stream file,
/// `file:///path/cam.h264?fps=25&loop=true`.
pub struct AnnexbFileSource {
    path: PathBuf,
    codec: VideoCodec,
    fps: u32,
    looping: bool,
    decoder: Option<Arc<Mutex<Decoder>>>,
    streams: Vec<VideoStream>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl AnnexbFileSource {
    pub fn from_url(url: &url::Url) -> Result<Self> {
        let path = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("invalid file url: {}", url))?;

        let mut fps = DEFAULT_FPS;
        let mut looping = false;
        let mut codec = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fps" => fps = value.parse().unwrap_or(DEFAULT_FPS).max(1),
                "loop" => looping = value == "true" || value == "1",
                "codec" => codec = VideoCodec::from_name(&value),
                _ => {}
            }
        }

        let codec = match codec {
            Some(codec) => codec,
            None => match path.extension().and_then(|e| e.to_str()) {
                Some("h264") | Some("264") | Some("avc") => VideoCodec::H264,
                Some("h265") | Some("265") | Some("hevc") => VideoCodec::H265,
                _ => anyhow::bail!("cannot tell codec of {}", path.display()),
            },
        };

        let (paused, _) = watch::channel(false);
        Ok(Self {
            path,
            codec,
            fps,
            looping,
            decoder: None,
            streams: Vec::new(),
            paused,
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl StreamSource for AnnexbFileSource {
    async fn connect(&mut self) -> Result<()> {
        let data = Bytes::from(tokio::fs::read(&self.path).await?);
        let decoder = Decoder::new(self.codec, data);
        if decoder.nalus.is_empty() {
            anyhow::bail!("no NAL units in {}", self.path.display());
        }
        let stream = decoder.describe();
        debug!(
            path = %self.path.display(),
            codec = %stream.codec,
            "[source] {}x{} {} NAL units",
            stream.width,
            stream.height,
            decoder.nalus.len()
        );
        self.streams = vec![VideoStream {
            fps: self.fps,
            ..stream
        }];
        self.decoder = Some(Arc::new(Mutex::new(decoder)));
        Ok(())
    }

    fn video_streams(&self) -> Vec<VideoStream> {
        self.streams.clone()
    }

    async fn start(&mut self, packets: Sender<Packet>, errors: Sender<AppError>) -> Result<()> {
        let decoder = self
            .decoder
            .clone()
            .ok_or_else(|| anyhow::anyhow!("source not connected"))?;
        let mut paused = self.paused.subscribe();
        let cancel = self.cancel.clone();
        let looping = self.looping;
        let codec = self.codec.name().to_string();
        let frame_duration = Duration::from_secs(1) / self.fps;
        let path = self.path.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            let mut frame_no: u32 = 0;
            loop {
                if *paused.borrow_and_update() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = paused.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let next = {
                    let mut decoder = decoder.lock().await;
                    match decoder.next_access_unit() {
                        Some(au) => Some(au),
                        None if looping => {
                            decoder.rewind();
                            decoder.next_access_unit()
                        }
                        None => None,
                    }
                };
                let Some((data, is_keyframe, has_picture)) = next else {
                    info!(path = %path.display(), "[source] end of stream");
                    break;
                };
                if !has_picture {
                    let _ = errors
                        .send(AppError::protocol("access unit without picture"))
                        .await;
                    continue;
                }

                let dts = frame_duration * frame_no;
                frame_no += 1;
                let packet = Packet {
                    idx: 0,
                    codec: codec.clone(),
                    kind: MediaKind::Video,
                    is_keyframe,
                    dts,
                    cts: Duration::ZERO,
                    data,
                };
                if packets.send(packet).await.is_err() {
                    warn!(path = %path.display(), "[source] packet receiver dropped");
                    break;
                }
            }
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
        self.decoder = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x01, 0x41, 0xFB, 0x01];
    const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

    fn sample_stream() -> Bytes {
        let mut v = Vec::new();
        for nalu in [&SPS[..], &PPS[..], &[0x65, 0x88, 0x84][..], &[0x41, 0x9A][..], &[0x41, 0x9B][..]] {
            v.extend_from_slice(&[0, 0, 0, 1]);
            v.extend_from_slice(nalu);
        }
        Bytes::from(v)
    }

    #[test]
    fn test_access_units_split_at_pictures() {
        let mut decoder = Decoder::new(VideoCodec::H264, sample_stream());
        let (first, key, pic) = decoder.next_access_unit().unwrap();
        assert!(key && pic);
        assert_eq!(split_annexb(&first).len(), 3);
        let (_, key, pic) = decoder.next_access_unit().unwrap();
        assert!(!key && pic);
        assert!(decoder.next_access_unit().is_some());
        assert!(decoder.next_access_unit().is_none());
        decoder.rewind();
        assert!(decoder.next_access_unit().unwrap().1);
    }

    #[test]
    fn test_describe_reads_parameter_sets() {
        let decoder = Decoder::new(VideoCodec::H264, sample_stream());
        let stream = decoder.describe();
        assert_eq!(stream.codec, "H264");
        assert_eq!(stream.sps.as_deref(), Some(&SPS[..]));
        assert_eq!(stream.pps.as_deref(), Some(&PPS[..]));
    }

    #[test]
    fn test_from_url_options() {
        let url = url::Url::parse("file:///tmp/cam-1.265?fps=10&loop=true").unwrap();
        let source = AnnexbFileSource::from_url(&url).unwrap();
        assert_eq!(source.codec, VideoCodec::H265);
        assert_eq!(source.fps, 10);
        assert!(source.looping);

        let url = url::Url::parse("file:///tmp/cam-1.mjpeg").unwrap();
        assert!(AnnexbFileSource::from_url(&url).is_err());
    }
}
