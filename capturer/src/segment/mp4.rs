// mp4.rs – single video track fragmented MP4 clip writer
//
// Layout of a finished clip:
//   ftyp moov(mvhd trak mvex)   header, written when the clip opens
//   (moof mdat)*                one fragment per GOP
//   mfra(tfra mfro)             trailer, random access index

use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::result::Result;

const TRACK_ID: u32 = 1;
const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

#[derive(Clone, Debug)]
pub struct Mp4Sample {
    pub duration: u32,
    pub is_sync: bool,
    pub bytes: Vec<u8>,
}

/// Box builder for one H.264 (`avc1`) or H.265 (`hev1`) track.
#[derive(Clone, Debug)]
pub struct Fmp4Writer {
    pub timescale: u32,
    pub width: u32,
    pub height: u32,
    pub codec_string: String,
    /// [sps, pps..] for AVC, [hvcC record] for HEVC
    pub codec_config: Vec<Vec<u8>>,
}

impl Fmp4Writer {
    pub fn new(
        timescale: u32,
        width: u32,
        height: u32,
        codec_string: String,
        codec_config: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            timescale,
            width,
            height,
            codec_string,
            codec_config,
        }
    }

    fn is_hevc(&self) -> bool {
        let cs = self.codec_string.to_ascii_lowercase();
        cs.starts_with("hev1") || cs.starts_with("hvc1")
    }

    /// `ftyp` + `moov`
    pub fn build_header(&self) -> Vec<u8> {
        let mut out = self.build_ftyp();
        out.extend_from_slice(&self.build_moov());
        out
    }

    fn build_ftyp(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(28);
        payload.extend_from_slice(b"isom");
        be_u32(&mut payload, 512);
        for brand in [b"isom", b"iso6", b"mp41"] {
            payload.extend_from_slice(brand);
        }
        payload.extend_from_slice(if self.is_hevc() { b"hev1" } else { b"avc1" });
        make_box(b"ftyp", &payload)
    }

    fn build_moov(&self) -> Vec<u8> {
        let mut payload = build_mvhd(self.timescale, TRACK_ID + 1);
        payload.extend_from_slice(&self.build_trak());
        payload.extend_from_slice(&build_mvex(TRACK_ID));
        make_box(b"moov", &payload)
    }

    fn build_trak(&self) -> Vec<u8> {
        let mut minf = build_vmhd();
        minf.extend_from_slice(&build_dinf());
        minf.extend_from_slice(&self.build_stbl());

        let mut mdia = build_mdhd(self.timescale);
        mdia.extend_from_slice(&build_hdlr(b"vide", b"VideoHandler\0"));
        mdia.extend_from_slice(&make_box(b"minf", &minf));

        let mut payload = build_tkhd(TRACK_ID, self.width, self.height);
        payload.extend_from_slice(&make_box(b"mdia", &mdia));
        make_box(b"trak", &payload)
    }

    fn build_stbl(&self) -> Vec<u8> {
        let mut stsd = Vec::new();
        be_u32(&mut stsd, 0); // version & flags
        be_u32(&mut stsd, 1); // entry_count
        stsd.extend_from_slice(&self.build_sample_entry());

        let mut payload = make_box(b"stsd", &stsd);
        for typ in [b"stts", b"stsc", b"stco"] {
            payload.extend_from_slice(&make_box(typ, &[0u8; 8]));
        }
        payload.extend_from_slice(&make_box(b"stsz", &[0u8; 12]));
        make_box(b"stbl", &payload)
    }

    fn build_sample_entry(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(86);
        zeroes(&mut payload, 6); // reserved
        be_u16(&mut payload, 1); // data_reference_index
        zeroes(&mut payload, 16); // pre_defined & reserved
        be_u16(&mut payload, self.width as u16);
        be_u16(&mut payload, self.height as u16);
        be_u32(&mut payload, 0x0048_0000); // 72 dpi
        be_u32(&mut payload, 0x0048_0000);
        be_u32(&mut payload, 0); // reserved
        be_u16(&mut payload, 1); // frame_count
        zeroes(&mut payload, 32); // compressor name
        be_u16(&mut payload, 0x0018); // depth
        be_u16(&mut payload, 0xFFFF); // pre_defined

        if self.is_hevc() {
            let hvcc = self.codec_config.first().map(Vec::as_slice).unwrap_or(&[]);
            payload.extend_from_slice(&make_box(b"hvcC", hvcc));
            make_box(b"hev1", &payload)
        } else {
            payload.extend_from_slice(&build_avcc(&self.codec_config));
            make_box(b"avc1", &payload)
        }
    }

    /// `moof` + `mdat` holding `samples`, starting at decode time `base_time`.
    pub fn build_fragment(&self, seq_number: u32, base_time: u64, samples: &[Mp4Sample]) -> Vec<u8> {
        let trun_size = 20 + 12 * samples.len();
        let traf_size = 8 + 16 + 20 + trun_size;
        let moof_size = 8 + 16 + traf_size;
        let data_size: usize = samples.iter().map(|s| s.bytes.len()).sum();

        let mut out = Vec::with_capacity(moof_size + 8 + data_size);
        be_u32(&mut out, moof_size as u32);
        out.extend_from_slice(b"moof");

        be_u32(&mut out, 16);
        out.extend_from_slice(b"mfhd");
        be_u32(&mut out, 0);
        be_u32(&mut out, seq_number);

        be_u32(&mut out, traf_size as u32);
        out.extend_from_slice(b"traf");

        be_u32(&mut out, 16);
        out.extend_from_slice(b"tfhd");
        be_u32(&mut out, 0x0002_0000); // default-base-is-moof
        be_u32(&mut out, TRACK_ID);

        be_u32(&mut out, 20);
        out.extend_from_slice(b"tfdt");
        be_u32(&mut out, 0x0100_0000); // version 1
        out.extend_from_slice(&base_time.to_be_bytes());

        be_u32(&mut out, trun_size as u32);
        out.extend_from_slice(b"trun");
        // data-offset | sample-duration | sample-size | sample-flags
        be_u32(&mut out, 0x0000_0701);
        be_u32(&mut out, samples.len() as u32);
        be_u32(&mut out, (moof_size + 8) as u32);
        for s in samples {
            be_u32(&mut out, s.duration);
            be_u32(&mut out, s.bytes.len() as u32);
            be_u32(
                &mut out,
                if s.is_sync {
                    SAMPLE_FLAGS_SYNC
                } else {
                    SAMPLE_FLAGS_NON_SYNC
                },
            );
        }

        be_u32(&mut out, (8 + data_size) as u32);
        out.extend_from_slice(b"mdat");
        for s in samples {
            out.extend_from_slice(&s.bytes);
        }
        out
    }

    /// `mfra` trailer indexing every fragment by (decode time, moof offset).
    pub fn build_trailer(&self, fragments: &[(u64, u64)]) -> Vec<u8> {
        let mut tfra = Vec::with_capacity(12 + fragments.len() * 19);
        be_u32(&mut tfra, 0x0100_0000); // version 1
        be_u32(&mut tfra, TRACK_ID);
        be_u32(&mut tfra, 0); // 1-byte traf/trun/sample numbers
        be_u32(&mut tfra, fragments.len() as u32);
        for &(time, offset) in fragments {
            tfra.extend_from_slice(&time.to_be_bytes());
            tfra.extend_from_slice(&offset.to_be_bytes());
            tfra.extend_from_slice(&[1, 1, 1]);
        }
        let tfra = make_box(b"tfra", &tfra);

        let mfra_size = (8 + tfra.len() + 16) as u32;
        let mut mfro = Vec::with_capacity(8);
        be_u32(&mut mfro, 0);
        be_u32(&mut mfro, mfra_size);

        let mut payload = tfra;
        payload.extend_from_slice(&make_box(b"mfro", &mfro));
        make_box(b"mfra", &payload)
    }
}

struct Pending {
    dts: u64,
    is_sync: bool,
    bytes: Vec<u8>,
}

/// An open clip file. Samples are grouped into one fragment per GOP.
pub struct Mp4File {
    path: PathBuf,
    file: File,
    writer: Fmp4Writer,
    written: u64,
    seq: u32,
    origin: Option<u64>,
    pending: Vec<Pending>,
    last_duration: u32,
    fragments: Vec<(u64, u64)>,
}

impl Mp4File {
    /// Create the file and write the header.
    pub async fn create(path: &Path, writer: Fmp4Writer) -> Result<Self> {
        let mut file = File::create(path).await?;
        let header = writer.build_header();
        file.write_all(&header).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_duration: writer.timescale / 30,
            writer,
            written: header.len() as u64,
            seq: 0,
            origin: None,
            pending: Vec::new(),
            fragments: Vec::new(),
        })
    }

    /// Append one length-prefixed access unit. `dts` is in track timescale units.
    pub async fn write_sample(&mut self, dts: u64, is_sync: bool, bytes: Vec<u8>) -> Result<()> {
        let origin = *self.origin.get_or_insert(dts);
        let dts = dts.saturating_sub(origin);
        if is_sync && !self.pending.is_empty() {
            self.flush(Some(dts)).await?;
        }
        self.pending.push(Pending {
            dts,
            is_sync,
            bytes,
        });
        Ok(())
    }

    async fn flush(&mut self, next_dts: Option<u64>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let base_time = pending[0].dts;

        let mut samples = Vec::with_capacity(pending.len());
        for (i, p) in pending.iter().enumerate() {
            let next = pending.get(i + 1).map(|n| n.dts).or(next_dts);
            let duration = match next {
                Some(next) if next > p.dts => (next - p.dts).min(u32::MAX as u64) as u32,
                _ => self.last_duration,
            };
            self.last_duration = duration;
            samples.push(Mp4Sample {
                duration,
                is_sync: p.is_sync,
                bytes: p.bytes.clone(),
            });
        }

        self.seq += 1;
        let fragment = self.writer.build_fragment(self.seq, base_time, &samples);
        self.file.write_all(&fragment).await?;
        self.fragments.push((base_time, self.written));
        self.written += fragment.len() as u64;
        Ok(())
    }

    /// Flush buffered samples, write the trailer and close the file.
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.flush(None).await?;
        let trailer = self.writer.build_trailer(&self.fragments);
        self.file.write_all(&trailer).await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.path)
    }
}

// ======================= standalone box builders ===========================

fn build_mvhd(timescale: u32, next_track_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(100);
    be_u32(&mut payload, 0); // version & flags
    zeroes(&mut payload, 8); // creation & modification time
    be_u32(&mut payload, timescale);
    be_u32(&mut payload, 0); // duration unknown
    be_u32(&mut payload, 0x0001_0000); // rate 1.0
    be_u16(&mut payload, 0x0100); // volume 1.0
    zeroes(&mut payload, 10); // reserved
    unity_matrix(&mut payload);
    zeroes(&mut payload, 24); // pre_defined
    be_u32(&mut payload, next_track_id);
    make_box(b"mvhd", &payload)
}

fn build_tkhd(track_id: u32, width: u32, height: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(84);
    be_u32(&mut payload, 0x0000_0007); // enabled, in movie, in preview
    zeroes(&mut payload, 8); // creation & modification time
    be_u32(&mut payload, track_id);
    be_u32(&mut payload, 0); // reserved
    be_u32(&mut payload, 0); // duration
    zeroes(&mut payload, 8); // reserved
    zeroes(&mut payload, 8); // layer, alternate group, volume, reserved
    unity_matrix(&mut payload);
    be_u32(&mut payload, width << 16);
    be_u32(&mut payload, height << 16);
    make_box(b"tkhd", &payload)
}

fn build_mdhd(timescale: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    be_u32(&mut payload, 0);
    zeroes(&mut payload, 8);
    be_u32(&mut payload, timescale);
    be_u32(&mut payload, 0);
    be_u16(&mut payload, 0x55C4); // und
    be_u16(&mut payload, 0);
    make_box(b"mdhd", &payload)
}

fn build_hdlr(typ: &[u8; 4], name: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24 + name.len());
    be_u32(&mut payload, 0);
    be_u32(&mut payload, 0);
    payload.extend_from_slice(typ);
    zeroes(&mut payload, 12);
    payload.extend_from_slice(name);
    make_box(b"hdlr", &payload)
}

fn build_vmhd() -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    be_u32(&mut payload, 0x0000_0001);
    zeroes(&mut payload, 8); // graphics mode & opcolor
    make_box(b"vmhd", &payload)
}

fn build_dinf() -> Vec<u8> {
    let mut url = Vec::with_capacity(4);
    be_u32(&mut url, 0x0000_0001); // self-contained

    let mut dref = Vec::with_capacity(20);
    be_u32(&mut dref, 0);
    be_u32(&mut dref, 1);
    dref.extend_from_slice(&make_box(b"url ", &url));

    make_box(b"dinf", &make_box(b"dref", &dref))
}

fn build_avcc(config: &[Vec<u8>]) -> Vec<u8> {
    let Some((sps, pps_list)) = config.split_first() else {
        return make_box(b"avcC", &[]);
    };

    let mut payload = vec![
        1u8,
        sps.get(1).copied().unwrap_or(0), // profile
        sps.get(2).copied().unwrap_or(0), // compatibility
        sps.get(3).copied().unwrap_or(0), // level
        0xFF,                             // 4-byte NAL lengths
        0xE1,                             // one SPS
    ];
    be_u16(&mut payload, sps.len() as u16);
    payload.extend_from_slice(sps);
    payload.push(pps_list.len() as u8);
    for pps in pps_list {
        be_u16(&mut payload, pps.len() as u16);
        payload.extend_from_slice(pps);
    }
    make_box(b"avcC", &payload)
}

fn build_mvex(track_id: u32) -> Vec<u8> {
    let mut trex = Vec::with_capacity(24);
    be_u32(&mut trex, 0);
    be_u32(&mut trex, track_id);
    be_u32(&mut trex, 1); // default_sample_description_index
    be_u32(&mut trex, 0); // default_sample_duration
    be_u32(&mut trex, 0); // default_sample_size
    be_u32(&mut trex, SAMPLE_FLAGS_NON_SYNC);
    make_box(b"mvex", &make_box(b"trex", &trex))
}

// ======================= generic helpers ===================================

fn make_box(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + payload.len());
    be_u32(&mut v, (8 + payload.len()) as u32);
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

fn unity_matrix(buf: &mut Vec<u8>) {
    for v in [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        be_u32(buf, v);
    }
}

#[inline]
fn be_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
fn be_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
fn zeroes(buf: &mut Vec<u8>, n: usize) {
    buf.resize(buf.len() + n, 0);
}

/// Top-level boxes of a buffer as (fourcc, offset, size).
pub fn top_level_boxes(buf: &[u8]) -> Vec<([u8; 4], usize, usize)> {
    let mut boxes = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= buf.len() {
        let size = BigEndian::read_u32(&buf[offset..offset + 4]) as usize;
        if size < 8 || offset + size > buf.len() {
            break;
        }
        let mut typ = [0u8; 4];
        typ.copy_from_slice(&buf[offset + 4..offset + 8]);
        boxes.push((typ, offset, size));
        offset += size;
    }
    boxes
}
