pub mod h264;
pub mod h265;

use bytes::Bytes;

use h264::H264Adapter;
use h265::H265Adapter;

/// Codec specifics the muxer needs, hidden behind one interface.
pub trait CodecAdapter: Send {
    /// Track timescale, 90 kHz for both supported codecs.
    fn timescale(&self) -> u32 {
        90_000
    }

    /// Whether every parameter set needed for the sample entry was seen.
    fn ready(&self) -> bool;

    /// Convert an Annex-B access unit to 4-byte length-prefixed NAL units, returns:
    /// - Vec<u8>  converted payload
    /// - bool     whether the access unit holds a random access picture
    /// - bool     whether this call completed the codec config
    fn convert_frame(&mut self, frame: &Bytes) -> (Vec<u8>, bool, bool);

    /// Blobs for the codec configuration box.
    fn codec_config(&self) -> Option<Vec<Vec<u8>>>;

    /// Sample entry fourcc plus profile, e.g. "avc1.42e01e" or "hvc1".
    fn codec_string(&self) -> Option<String>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Feed out-of-band parameter sets (as announced by the transport).
    fn seed(&mut self, parameter_sets: &[Bytes]) {
        let mut annexb = Vec::new();
        for nalu in parameter_sets.iter().filter(|n| !n.is_empty()) {
            annexb.extend_from_slice(&[0, 0, 0, 1]);
            annexb.extend_from_slice(nalu);
        }
        if !annexb.is_empty() {
            let _ = self.convert_frame(&Bytes::from(annexb));
        }
    }
}

/// Video codecs a clip can be recorded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Match a transport codec name, `None` for anything unsupported.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "H264" | "H.264" | "AVC" | "AVC1" => Some(VideoCodec::H264),
            "H265" | "H.265" | "HEVC" | "HVC1" | "HEV1" => Some(VideoCodec::H265),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
        }
    }

    /// Whether a NAL unit header starts a coded picture.
    pub fn is_vcl(&self, nalu: &[u8]) -> bool {
        match (self, nalu.first()) {
            (VideoCodec::H264, Some(h)) => (1..=5).contains(&(h & 0x1F)),
            (VideoCodec::H265, Some(h)) => ((h >> 1) & 0x3F) < 32,
            _ => false,
        }
    }

    /// Whether a NAL unit header marks a random access picture.
    pub fn is_random_access(&self, nalu: &[u8]) -> bool {
        match (self, nalu.first()) {
            (VideoCodec::H264, Some(h)) => h & 0x1F == 5,
            (VideoCodec::H265, Some(h)) => (16..=21).contains(&((h >> 1) & 0x3F)),
            _ => false,
        }
    }
}

pub fn create_video_adapter(codec: VideoCodec) -> Box<dyn CodecAdapter> {
    match codec {
        VideoCodec::H264 => Box::new(H264Adapter::new()),
        VideoCodec::H265 => Box::new(H265Adapter::new()),
    }
}

/// Split an Annex-B buffer into NAL unit bodies (start codes removed).
pub fn split_annexb(bytes: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 3 <= bytes.len() {
        if bytes[i] == 0 && bytes[i + 1] == 0 && bytes[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (n, &(_, body)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map(|&(sc, _)| sc).unwrap_or(bytes.len());
        // a 4-byte start code leaves one zero behind
        while end > body && bytes[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        if end > body {
            nalus.push(&bytes[body..end]);
        }
    }
    nalus
}

/// Prefix a NAL unit body with its 4-byte big-endian length.
pub fn length_prefixed(nalu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + nalu.len());
    out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
    out.extend_from_slice(nalu);
    out
}
