use std::io::Cursor;

use bytes::Bytes;
use scuffle_h265::{
    ConstantFrameRate, HEVCDecoderConfigurationRecord, NALUnitType, NaluArray,
    NumTemporalLayers, ParallelismType, SpsNALUnit,
};

use super::{length_prefixed, split_annexb, CodecAdapter};

const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;

/// Collects VPS/SPS/PPS and rewrites Annex-B access units as hvcC-style samples.
pub struct H265Adapter {
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    width: u32,
    height: u32,
}

impl Default for H265Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl H265Adapter {
    pub fn new() -> Self {
        Self {
            vps: None,
            sps: None,
            pps: None,
            width: 0,
            height: 0,
        }
    }

    fn store(target: &mut Option<Vec<u8>>, nalu: &[u8]) -> bool {
        if target.as_deref() == Some(nalu) {
            return false;
        }
        *target = Some(nalu.to_vec());
        true
    }

    fn parse_dimensions(&mut self) {
        let Some(sps) = self.sps.as_ref() else {
            return;
        };
        if let Ok(parsed) = SpsNALUnit::parse(Cursor::new(sps)) {
            self.width = parsed.rbsp.cropped_width() as u32;
            self.height = parsed.rbsp.cropped_height() as u32;
        }
    }

    fn build_hvcc(&self) -> Option<Vec<u8>> {
        let vps = self.vps.as_ref()?;
        let sps = self.sps.as_ref()?;
        let pps = self.pps.as_ref()?;

        let parsed = SpsNALUnit::parse(Cursor::new(sps)).ok()?;
        let profile = parsed.rbsp.profile_tier_level.general_profile.clone();
        // 48 constraint flag bits follow the 2-byte header and 5 profile bytes
        let constraint_flags = sps
            .get(7..13)
            .map(|b| b.iter().fold(0u64, |acc, &x| (acc << 8) | x as u64))
            .unwrap_or(0);

        let array = |nal_unit_type, nalu: &Vec<u8>| NaluArray {
            array_completeness: true,
            nal_unit_type,
            nalus: vec![Bytes::copy_from_slice(nalu)],
        };

        let config = HEVCDecoderConfigurationRecord {
            general_profile_space: profile.profile_space,
            general_tier_flag: profile.tier_flag,
            general_profile_idc: profile.profile_idc,
            general_profile_compatibility_flags: profile.profile_compatibility_flag,
            general_constraint_indicator_flags: constraint_flags,
            general_level_idc: profile.level_idc.unwrap_or_default(),
            min_spatial_segmentation_idc: 0,
            parallelism_type: ParallelismType(0),
            chroma_format_idc: parsed.rbsp.chroma_format_idc,
            bit_depth_luma_minus8: parsed.rbsp.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: parsed.rbsp.bit_depth_chroma_minus8,
            avg_frame_rate: 0,
            constant_frame_rate: ConstantFrameRate(0),
            num_temporal_layers: NumTemporalLayers(parsed.rbsp.sps_max_sub_layers_minus1 + 1),
            temporal_id_nested: parsed.rbsp.sps_temporal_id_nesting_flag,
            length_size_minus_one: 3,
            arrays: vec![
                array(NALUnitType::VpsNut, vps),
                array(NALUnitType::SpsNut, sps),
                array(NALUnitType::PpsNut, pps),
            ],
        };

        let mut buf = Vec::new();
        config.mux(&mut buf).ok()?;
        Some(buf)
    }
}

impl CodecAdapter for H265Adapter {
    fn ready(&self) -> bool {
        self.vps.is_some() && self.sps.is_some() && self.pps.is_some()
    }

    fn convert_frame(&mut self, frame: &Bytes) -> (Vec<u8>, bool, bool) {
        let was_ready = self.ready();
        let mut payload = Vec::with_capacity(frame.len() + 8);
        let mut random_access = false;
        let mut sps_changed = false;

        for nalu in split_annexb(frame) {
            if nalu.len() < 2 {
                continue;
            }
            match (nalu[0] >> 1) & 0x3F {
                NAL_VPS => {
                    Self::store(&mut self.vps, nalu);
                }
                NAL_SPS => sps_changed |= Self::store(&mut self.sps, nalu),
                NAL_PPS => {
                    Self::store(&mut self.pps, nalu);
                }
                16..=21 => random_access = true,
                _ => {}
            }
            payload.extend_from_slice(&length_prefixed(nalu));
        }

        if sps_changed {
            self.parse_dimensions();
        }
        (payload, random_access, !was_ready && self.ready())
    }

    fn codec_config(&self) -> Option<Vec<Vec<u8>>> {
        self.build_hvcc().map(|hvcc| vec![hvcc])
    }

    fn codec_string(&self) -> Option<String> {
        self.ready().then(|| "hev1".to_string())
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

    #[test]
    fn test_random_access_detection() {
        let mut adapter = H265Adapter::new();
        let frame = Bytes::from_static(&[
            0, 0, 0, 1, 0x40, 0x01, 0x0C, // VPS
            0, 0, 0, 1, 0x26, 0x01, 0xAF, // IDR_W_RADL
        ]);
        let (payload, random_access, cfg_updated) = adapter.convert_frame(&frame);
        assert!(random_access);
        assert!(!cfg_updated);
        assert!(!adapter.ready());
        assert_eq!(payload.len(), 2 * (4 + 3));
        assert!(adapter.codec_string().is_none());
    }

    #[test]
    fn test_trailing_picture_is_not_random_access() {
        let mut adapter = H265Adapter::new();
        let (_, random_access, _) =
            adapter.convert_frame(&Bytes::from_static(&[0, 0, 1, 0x02, 0x01, 0xD0]));
        assert!(!random_access);
    }
}
