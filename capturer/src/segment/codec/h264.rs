use bytes::Bytes;
use h264_reader::nal::sps::SeqParameterSet;
use h264_reader::rbsp::{decode_nal, BitReader};

use super::{length_prefixed, split_annexb, CodecAdapter};

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_IDR: u8 = 5;

/// Collects SPS/PPS and rewrites Annex-B access units as AVCC samples.
pub struct H264Adapter {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    width: u32,
    height: u32,
}

impl Default for H264Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Adapter {
    pub fn new() -> Self {
        Self {
            sps: None,
            pps: None,
            width: 0,
            height: 0,
        }
    }

    fn parse_dimensions(&mut self, sps: &[u8]) {
        let Ok(rbsp) = decode_nal(sps) else {
            return;
        };
        if let Ok(sps) = SeqParameterSet::from_bits(BitReader::new(&rbsp[..])) {
            if let Ok((w, h)) = sps.pixel_dimensions() {
                self.width = w;
                self.height = h;
            }
        }
    }
}

impl CodecAdapter for H264Adapter {
    fn ready(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn convert_frame(&mut self, frame: &Bytes) -> (Vec<u8>, bool, bool) {
        let was_ready = self.ready();
        let mut payload = Vec::with_capacity(frame.len() + 8);
        let mut is_idr = false;

        for nalu in split_annexb(frame) {
            match nalu[0] & 0x1F {
                NAL_SPS => {
                    if self.sps.as_deref() != Some(nalu) {
                        self.sps = Some(nalu.to_vec());
                        self.parse_dimensions(nalu);
                    }
                }
                NAL_PPS => {
                    if self.pps.as_deref() != Some(nalu) {
                        self.pps = Some(nalu.to_vec());
                    }
                }
                NAL_IDR => is_idr = true,
                _ => {}
            }
            payload.extend_from_slice(&length_prefixed(nalu));
        }

        (payload, is_idr, !was_ready && self.ready())
    }

    fn codec_config(&self) -> Option<Vec<Vec<u8>>> {
        Some(vec![self.sps.clone()?, self.pps.clone()?])
    }

    fn codec_string(&self) -> Option<String> {
        let sps = self.sps.as_ref()?;
        if sps.len() >= 4 {
            Some(format!("avc1.{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
        } else {
            Some("avc1".to_string())
        }
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Baseline 3.0 320x240 parameter sets
    const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x01, 0x41, 0xFB, 0x01];
    const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

    fn idr_frame() -> Bytes {
        let mut frame = vec![0, 0, 0, 1];
        frame.extend_from_slice(&SPS);
        frame.extend_from_slice(&[0, 0, 0, 1]);
        frame.extend_from_slice(&PPS);
        frame.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33]);
        Bytes::from(frame)
    }

    #[test]
    fn test_collects_parameter_sets() {
        let mut adapter = H264Adapter::new();
        assert!(!adapter.ready());

        let (payload, is_idr, cfg_updated) = adapter.convert_frame(&idr_frame());
        assert!(is_idr);
        assert!(cfg_updated);
        assert!(adapter.ready());
        assert_eq!(&payload[..4], &(SPS.len() as u32).to_be_bytes());
        assert_eq!(adapter.codec_string().as_deref(), Some("avc1.42c01e"));
        assert_eq!(adapter.codec_config().unwrap()[1], PPS.to_vec());

        let (_, _, cfg_updated) = adapter.convert_frame(&idr_frame());
        assert!(!cfg_updated);
    }

    #[test]
    fn test_non_idr_frame() {
        let mut adapter = H264Adapter::new();
        let (payload, is_idr, cfg_updated) =
            adapter.convert_frame(&Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A, 0x02]));
        assert!(!is_idr);
        assert!(!cfg_updated);
        assert_eq!(payload, vec![0, 0, 0, 3, 0x41, 0x9A, 0x02]);
    }

    #[test]
    fn test_seed_from_out_of_band_parameter_sets() {
        let mut adapter = H264Adapter::new();
        adapter.seed(&[Bytes::from_static(&SPS), Bytes::from_static(&PPS)]);
        assert!(adapter.ready());
    }
}
