use std::io::Cursor;

use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};
use scuffle_h265::{
    ConstantFrameRate, HEVCDecoderConfigurationRecord, NALUnitType, NumTemporalLayers,
    ParallelismType, SpsNALUnit,
};

use crate::annexb::START_CODE;

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;

/// Type field of an HEVC NAL unit, from its first header byte.
pub fn nal_unit_type(header: u8) -> u8 {
    (header >> 1) & 0x3F
}

/// BLA/IDR/CRA slice types start a decodable sequence.
pub fn is_irap(nal_type: u8) -> bool {
    (16..=21).contains(&nal_type)
}

/// Parameter sets carried by an hvcC record.
#[derive(Debug, Clone, Default)]
pub struct HevcParameterSets {
    pub vps: Vec<Bytes>,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl HevcParameterSets {
    pub fn is_complete(&self) -> bool {
        !self.vps.is_empty() && !self.sps.is_empty() && !self.pps.is_empty()
    }

    /// All parameter sets as one start-code-prefixed Annex-B blob,
    /// VPS then SPS then PPS.
    pub fn to_annexb(&self) -> Bytes {
        let mut out = BytesMut::new();
        for unit in self.vps.iter().chain(&self.sps).chain(&self.pps) {
            out.put_slice(&START_CODE);
            out.put_slice(unit);
        }
        out.freeze()
    }
}

/// Parse cropped picture dimensions out of an HEVC SPS NAL unit.
pub fn parse_sps_dimensions(sps: &[u8]) -> Result<(u32, u32)> {
    let parsed =
        SpsNALUnit::parse(Cursor::new(Bytes::copy_from_slice(sps))).map_err(|e| anyhow!("HEVC SPS parse: {}", e))?;
    Ok((
        parsed.rbsp.cropped_width() as u32,
        parsed.rbsp.cropped_height() as u32,
    ))
}

/// Build an hvcC record from raw VPS/SPS/PPS NAL units.
pub fn build_hvcc(sets: &HevcParameterSets) -> Result<Bytes> {
    let sps = sets
        .sps
        .first()
        .ok_or_else(|| anyhow!("no SPS for hvcC record"))?;
    if sets.vps.is_empty() || sets.pps.is_empty() {
        return Err(anyhow!("incomplete parameter sets for hvcC record"));
    }

    let parsed = SpsNALUnit::parse(Cursor::new(Bytes::copy_from_slice(sps)))
        .map_err(|e| anyhow!("HEVC SPS parse: {}", e))?;
    let profile = parsed.rbsp.profile_tier_level.general_profile.clone();
    let general_constraint_indicator_flags = if sps.len() >= 13 {
        ((sps[7] as u64) << 40)
            | ((sps[8] as u64) << 32)
            | ((sps[9] as u64) << 24)
            | ((sps[10] as u64) << 16)
            | ((sps[11] as u64) << 8)
            | (sps[12] as u64)
    } else {
        0
    };

    let config = HEVCDecoderConfigurationRecord {
        general_profile_space: profile.profile_space,
        general_tier_flag: profile.tier_flag,
        general_profile_idc: profile.profile_idc,
        general_profile_compatibility_flags: profile.profile_compatibility_flag,
        general_constraint_indicator_flags,
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
            scuffle_h265::NaluArray {
                array_completeness: true,
                nal_unit_type: NALUnitType::VpsNut,
                nalus: sets.vps.clone(),
            },
            scuffle_h265::NaluArray {
                array_completeness: true,
                nal_unit_type: NALUnitType::SpsNut,
                nalus: sets.sps.clone(),
            },
            scuffle_h265::NaluArray {
                array_completeness: true,
                nal_unit_type: NALUnitType::PpsNut,
                nalus: sets.pps.clone(),
            },
        ],
    };

    let mut buf = Vec::new();
    config
        .mux(&mut buf)
        .map_err(|e| anyhow!("hvcC serialize: {}", e))?;
    Ok(Bytes::from(buf))
}

/// Extract parameter sets from a serialized hvcC record.
pub fn parse_hvcc(data: &[u8]) -> Result<HevcParameterSets> {
    let record = HEVCDecoderConfigurationRecord::demux(&mut Cursor::new(Bytes::copy_from_slice(
        data,
    )))
    .map_err(|e| anyhow!("hvcC parse: {}", e))?;

    let mut sets = HevcParameterSets::default();
    for array in record.arrays {
        let target = match array.nal_unit_type {
            NALUnitType::VpsNut => &mut sets.vps,
            NALUnitType::SpsNut => &mut sets.sps,
            NALUnitType::PpsNut => &mut sets.pps,
            _ => continue,
        };
        target.extend(array.nalus);
    }
    if sets.sps.is_empty() {
        return Err(anyhow!("hvcC record carries no SPS"));
    }
    Ok(sets)
}
