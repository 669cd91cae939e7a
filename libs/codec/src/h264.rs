use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::annexb::START_CODE;
use crate::bits::{strip_emulation_prevention, BitCursor};

pub const NAL_NON_IDR_SLICE: u8 = 1;
pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// Type field of a NAL unit, from its first (header) byte.
pub fn nal_unit_type(header: u8) -> u8 {
    header & 0x1F
}

/// Parsed fields of a sequence parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct SpsInfo {
    pub id: u32,
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

/// Parse an SPS NAL unit (header byte included).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo> {
    use h264_reader::nal::sps::SeqParameterSet;
    use h264_reader::rbsp::{decode_nal, BitReader};

    if nal.len() < 4 || nal_unit_type(nal[0]) != NAL_SPS {
        return Err(anyhow!("not an SPS NAL unit"));
    }

    let rbsp = decode_nal(nal).map_err(|e| anyhow!("SPS RBSP decode: {:?}", e))?;
    let sps = SeqParameterSet::from_bits(BitReader::new(&rbsp[..]))
        .map_err(|e| anyhow!("SPS parse: {:?}", e))?;
    let (width, height) = sps
        .pixel_dimensions()
        .map_err(|e| anyhow!("SPS dimensions: {:?}", e))?;

    let mut framerate = 0.0;
    if let Some(vui) = &sps.vui_parameters {
        if let Some(timing) = &vui.timing_info {
            if timing.num_units_in_tick > 0 {
                framerate = timing.time_scale as f64 / (2.0 * timing.num_units_in_tick as f64);
            }
        }
    }

    // seq_parameter_set_id sits right after the three profile/level bytes.
    let stripped = strip_emulation_prevention(&nal[1..]);
    let mut cursor = BitCursor::new(&stripped);
    cursor.skip(24)?;
    let id = cursor.read_ue()?;

    Ok(SpsInfo {
        id,
        profile_idc: nal[1],
        constraint_flags: nal[2],
        level_idc: nal[3],
        width,
        height,
        framerate,
    })
}

/// Read the pic_parameter_set_id of a PPS NAL unit (header byte included).
pub fn parse_pps_id(nal: &[u8]) -> Result<u32> {
    if nal.is_empty() || nal_unit_type(nal[0]) != NAL_PPS {
        return Err(anyhow!("not a PPS NAL unit"));
    }
    let stripped = strip_emulation_prevention(&nal[1..]);
    let mut cursor = BitCursor::new(&stripped);
    cursor.read_ue().map_err(|e| anyhow!("PPS parse: {}", e))
}

/// AVCDecoderConfigurationRecord (ISO/IEC 14496-15 5.3.3.1).
#[derive(Debug, Clone, PartialEq)]
pub struct AvcDecoderConfigurationRecord {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub length_size_minus_one: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcDecoderConfigurationRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(anyhow!("avcC record too short: {} bytes", data.len()));
        }
        if data[0] != 1 {
            return Err(anyhow!("unsupported avcC version {}", data[0]));
        }
        let profile_indication = data[1];
        let profile_compatibility = data[2];
        let level_indication = data[3];
        let length_size_minus_one = data[4] & 0x03;

        let mut offset = 5usize;
        let sps_count = (data[offset] & 0x1F) as usize;
        offset += 1;
        let mut sps = Vec::with_capacity(sps_count);
        for _ in 0..sps_count {
            let unit = Self::read_unit(data, &mut offset)?;
            sps.push(unit);
        }
        if offset >= data.len() {
            return Err(anyhow!("avcC record truncated before PPS count"));
        }
        let pps_count = data[offset] as usize;
        offset += 1;
        let mut pps = Vec::with_capacity(pps_count);
        for _ in 0..pps_count {
            let unit = Self::read_unit(data, &mut offset)?;
            pps.push(unit);
        }

        Ok(Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_minus_one,
            sps,
            pps,
        })
    }

    fn read_unit(data: &[u8], offset: &mut usize) -> Result<Bytes> {
        if data.len() - *offset < 2 {
            return Err(anyhow!("avcC record truncated in parameter set length"));
        }
        let length = BigEndian::read_u16(&data[*offset..*offset + 2]) as usize;
        *offset += 2;
        if data.len() - *offset < length {
            return Err(anyhow!("avcC parameter set length {} out of range", length));
        }
        let unit = Bytes::copy_from_slice(&data[*offset..*offset + length]);
        *offset += length;
        Ok(unit)
    }

    /// Build a record from raw SPS/PPS NAL units; profile and level come from
    /// the first SPS.
    pub fn from_parameter_sets(sps: Vec<Bytes>, pps: Vec<Bytes>) -> Result<Self> {
        let first = sps
            .first()
            .ok_or_else(|| anyhow!("no SPS for avcC record"))?;
        if first.len() < 4 {
            return Err(anyhow!("SPS too short for avcC record"));
        }
        if pps.is_empty() {
            return Err(anyhow!("no PPS for avcC record"));
        }
        Ok(Self {
            profile_indication: first[1],
            profile_compatibility: first[2],
            level_indication: first[3],
            length_size_minus_one: 3,
            sps,
            pps,
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            7 + self.sps.iter().map(|s| s.len() + 2).sum::<usize>()
                + self.pps.iter().map(|p| p.len() + 2).sum::<usize>(),
        );
        out.put_u8(1);
        out.put_u8(self.profile_indication);
        out.put_u8(self.profile_compatibility);
        out.put_u8(self.level_indication);
        out.put_u8(0xFC | self.length_size_minus_one);
        out.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        out.freeze()
    }

    /// SPS and PPS units as one start-code-prefixed Annex-B blob.
    pub fn to_annexb(&self) -> Bytes {
        let mut out = BytesMut::new();
        for sps in &self.sps {
            out.put_slice(&START_CODE);
            out.put_slice(sps);
        }
        for pps in &self.pps {
            out.put_slice(&START_CODE);
            out.put_slice(pps);
        }
        out.freeze()
    }
}
