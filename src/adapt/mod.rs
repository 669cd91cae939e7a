use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use codec::aac::{AdtsHeader, AudioSpecificConfig};
use codec::h264::AvcDecoderConfigurationRecord;
use codec::h265::HevcParameterSets;
use codec::{annexb, h264, h265, opus};

use crate::error::RouteError;
use crate::media::{
    BitstreamFormat, FragmentationHeader, MediaPacket, MediaStream, MediaTrack, PacketType,
};
use crate::result::Result;

/// Output of one adaptation step. `config` carries a decoder configuration
/// the adapter synthesized for the track (delivered before `packet`);
/// `packet` is absent when the input was absorbed into track state.
#[derive(Debug)]
pub struct Adapted {
    pub config: Option<Arc<MediaPacket>>,
    pub packet: Option<Arc<MediaPacket>>,
}

impl Adapted {
    fn passthrough(packet: Arc<MediaPacket>) -> Self {
        Self {
            config: None,
            packet: Some(packet),
        }
    }
}

/// Per-track parameter sets picked up from sequence headers and from in-band
/// NAL units inside keyframes.
#[derive(Default)]
struct TrackContext {
    sps: BTreeMap<u32, Bytes>,
    pps: BTreeMap<u32, Bytes>,
    hevc: HevcParameterSets,
    asc: Option<AudioSpecificConfig>,
    asc_published: bool,
    opus_published: bool,
    video: Option<(u32, u32, f64)>,
}

impl TrackContext {
    fn observe_h264_nal(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        match h264::nal_unit_type(nal[0]) {
            h264::NAL_SPS => {
                match h264::parse_sps(nal) {
                    Ok(info) => {
                        self.video = Some((info.width, info.height, info.framerate));
                        self.sps.insert(info.id, Bytes::copy_from_slice(nal));
                    }
                    Err(err) => {
                        // Keep the unit anyway; conversion only needs the raw bytes.
                        debug!("SPS parse failed, caching without id: {}", err);
                        self.sps.insert(0, Bytes::copy_from_slice(nal));
                    }
                }
            }
            h264::NAL_PPS => {
                let id = h264::parse_pps_id(nal).unwrap_or(0);
                self.pps.insert(id, Bytes::copy_from_slice(nal));
            }
            _ => {}
        }
    }

    fn observe_avc_record(&mut self, record: &AvcDecoderConfigurationRecord) {
        for sps in &record.sps {
            self.observe_h264_nal(sps);
        }
        for pps in &record.pps {
            self.observe_h264_nal(pps);
        }
    }

    fn observe_hevc_nal(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        let target = match h265::nal_unit_type(nal[0]) {
            h265::NAL_VPS => &mut self.hevc.vps,
            h265::NAL_SPS => {
                if self.video.is_none() {
                    if let Ok((width, height)) = h265::parse_sps_dimensions(nal) {
                        self.video = Some((width, height, 0.0));
                    }
                }
                &mut self.hevc.sps
            }
            h265::NAL_PPS => &mut self.hevc.pps,
            _ => return,
        };
        if !target.iter().any(|unit| unit[..] == *nal) {
            target.push(Bytes::copy_from_slice(nal));
        }
    }

    fn avc_record(&self) -> Result<AvcDecoderConfigurationRecord> {
        AvcDecoderConfigurationRecord::from_parameter_sets(
            self.sps.values().cloned().collect(),
            self.pps.values().cloned().collect(),
        )
        .map_err(RouteError::malformed_bitstream)
    }

    /// Current SPS+PPS as a start-code-prefixed blob, for prepending to IDR
    /// packets.
    fn h264_parameter_blob(&self) -> Option<Bytes> {
        if self.sps.is_empty() || self.pps.is_empty() {
            return None;
        }
        let mut out = BytesMut::new();
        for unit in self.sps.values().chain(self.pps.values()) {
            out.put_slice(&annexb::START_CODE);
            out.put_slice(unit);
        }
        Some(out.freeze())
    }
}

/// Rewrites packet containers between the connector's emission and an
/// observer's required framing, without touching the coded samples.
#[derive(Default)]
pub struct BitstreamAdapter {
    tracks: HashMap<u32, TrackContext>,
}

impl BitstreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed per-track state from the decoder configurations the stream's
    /// tracks carry.
    pub fn prime(&mut self, stream: &MediaStream) {
        for track in stream.tracks() {
            let ctx = self.tracks.entry(track.id).or_default();
            let Some(config) = &track.decoder_config else {
                continue;
            };
            match track.origin_format {
                BitstreamFormat::H264Avcc | BitstreamFormat::H264AnnexB => {
                    if let Ok(record) = AvcDecoderConfigurationRecord::parse(config) {
                        ctx.observe_avc_record(&record);
                    }
                }
                BitstreamFormat::Hvcc | BitstreamFormat::HevcAnnexB => {
                    if let Ok(sets) = h265::parse_hvcc(config) {
                        if let Some(sps) = sets.sps.first() {
                            if let Ok((width, height)) = h265::parse_sps_dimensions(sps) {
                                ctx.video = Some((width, height, 0.0));
                            }
                        }
                        ctx.hevc = sets;
                    }
                }
                BitstreamFormat::AacAdts | BitstreamFormat::AacRaw => {
                    ctx.asc = AudioSpecificConfig::parse(config).ok();
                }
                BitstreamFormat::Opus => {
                    ctx.opus_published = true;
                }
                _ => {}
            }
        }
    }

    /// Drop every cached parameter set and re-seed from the refreshed track
    /// set. Called on stream updates.
    pub fn reset(&mut self, stream: &MediaStream) {
        self.tracks.clear();
        self.prime(stream);
    }

    /// Parsed SPS width, height and frame rate for a video track. The stream
    /// worker backfills these into the track when the connector supplied
    /// none.
    pub fn video_profile(&self, track_id: u32) -> Option<(u32, u32, f64)> {
        self.tracks.get(&track_id).and_then(|ctx| ctx.video)
    }

    pub fn adapt(
        &mut self,
        track: &MediaTrack,
        packet: &Arc<MediaPacket>,
        target: BitstreamFormat,
    ) -> Result<Adapted> {
        let source = packet.format();
        if source == target {
            return self.same_format(track, packet);
        }
        match (source, target) {
            (BitstreamFormat::H264AnnexB, BitstreamFormat::H264Avcc) => {
                self.h264_annexb_to_avcc(packet)
            }
            (BitstreamFormat::H264Avcc, BitstreamFormat::H264AnnexB) => {
                self.h264_avcc_to_annexb(packet)
            }
            (BitstreamFormat::HevcAnnexB, BitstreamFormat::Hvcc) => {
                self.hevc_annexb_to_hvcc(packet)
            }
            (BitstreamFormat::Hvcc, BitstreamFormat::HevcAnnexB) => {
                self.hevc_hvcc_to_annexb(packet)
            }
            (BitstreamFormat::AacAdts, BitstreamFormat::AacRaw) => self.aac_adts_to_raw(track, packet),
            (BitstreamFormat::AacRaw, BitstreamFormat::AacAdts) => self.aac_raw_to_adts(track, packet),
            (from, to) => Err(RouteError::UnsupportedConversion { from, to }),
        }
    }

    /// Identical framing passes through; Opus additionally gets an OpusHead
    /// sequence header attached on the first key packet of a track that
    /// carries none.
    fn same_format(&mut self, track: &MediaTrack, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        if packet.format() == BitstreamFormat::Opus
            && packet.is_key()
            && packet.packet_type() != PacketType::SequenceHeader
            && track.decoder_config.is_none()
        {
            let ctx = self.tracks.entry(track.id).or_default();
            if !ctx.opus_published {
                ctx.opus_published = true;
                let (channels, sample_rate) = track
                    .audio
                    .as_ref()
                    .map(|a| (a.channels, a.sample_rate))
                    .unwrap_or((2, 48000));
                let header = opus::OpusIdHeader::new(channels, sample_rate);
                let config = packet.rebind(
                    BitstreamFormat::Opus,
                    PacketType::SequenceHeader,
                    header.serialize(),
                    None,
                );
                return Ok(Adapted {
                    config: Some(Arc::new(config)),
                    packet: Some(packet.clone()),
                });
            }
        }
        Ok(Adapted::passthrough(packet.clone()))
    }

    fn h264_annexb_to_avcc(&mut self, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();
        let units = annexb::split_annexb(payload);
        if units.is_empty() {
            return Err(RouteError::malformed_bitstream(
                "no start code in H.264 Annex-B payload",
            ));
        }
        for (offset, length) in &units {
            ctx.observe_h264_nal(&payload[*offset..*offset + *length]);
        }

        if packet.packet_type() == PacketType::SequenceHeader {
            let record = ctx.avc_record()?;
            let out = packet.rebind(
                BitstreamFormat::H264Avcc,
                PacketType::SequenceHeader,
                record.serialize(),
                None,
            );
            return Ok(Adapted::passthrough(Arc::new(out)));
        }

        let out =
            annexb::annexb_to_length_prefixed(payload).map_err(RouteError::malformed_bitstream)?;
        let frag = FragmentationHeader::from_units(
            &annexb::split_length_prefixed(&out).map_err(RouteError::malformed_bitstream)?,
        );
        let adapted = packet.rebind(BitstreamFormat::H264Avcc, PacketType::Nalu, out, Some(frag));
        Ok(Adapted::passthrough(Arc::new(adapted)))
    }

    fn h264_avcc_to_annexb(&mut self, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();

        if packet.packet_type() == PacketType::SequenceHeader {
            let record = AvcDecoderConfigurationRecord::parse(payload)
                .map_err(RouteError::malformed_bitstream)?;
            ctx.observe_avc_record(&record);
            let blob = record.to_annexb();
            let frag = FragmentationHeader::from_units(&annexb::split_annexb(&blob));
            let out = packet.rebind(
                BitstreamFormat::H264AnnexB,
                PacketType::SequenceHeader,
                blob,
                Some(frag),
            );
            return Ok(Adapted::passthrough(Arc::new(out)));
        }

        let units =
            annexb::split_length_prefixed(payload).map_err(RouteError::malformed_bitstream)?;
        let mut has_idr = false;
        for (offset, length) in &units {
            let nal = &payload[*offset..*offset + *length];
            ctx.observe_h264_nal(nal);
            if !nal.is_empty() && h264::nal_unit_type(nal[0]) == h264::NAL_IDR_SLICE {
                has_idr = true;
            }
        }

        let body =
            annexb::length_prefixed_to_annexb(payload).map_err(RouteError::malformed_bitstream)?;
        // Parameter sets go in front of the IDR slice, once per packet.
        let blob = match ctx.h264_parameter_blob() {
            Some(params) if has_idr => {
                let mut out = BytesMut::with_capacity(params.len() + body.len());
                out.put_slice(&params);
                out.put_slice(&body);
                out.freeze()
            }
            _ => body,
        };
        let frag = FragmentationHeader::from_units(&annexb::split_annexb(&blob));
        let adapted = packet.rebind(BitstreamFormat::H264AnnexB, PacketType::Nalu, blob, Some(frag));
        Ok(Adapted::passthrough(Arc::new(adapted)))
    }

    fn hevc_annexb_to_hvcc(&mut self, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();
        let units = annexb::split_annexb(payload);
        if units.is_empty() {
            return Err(RouteError::malformed_bitstream(
                "no start code in HEVC Annex-B payload",
            ));
        }
        for (offset, length) in &units {
            ctx.observe_hevc_nal(&payload[*offset..*offset + *length]);
        }

        if packet.packet_type() == PacketType::SequenceHeader {
            if !ctx.hevc.is_complete() {
                return Err(RouteError::malformed_bitstream(
                    "HEVC sequence header lacks VPS/SPS/PPS",
                ));
            }
            let record = h265::build_hvcc(&ctx.hevc).map_err(RouteError::malformed_bitstream)?;
            let out = packet.rebind(BitstreamFormat::Hvcc, PacketType::SequenceHeader, record, None);
            return Ok(Adapted::passthrough(Arc::new(out)));
        }

        let out =
            annexb::annexb_to_length_prefixed(payload).map_err(RouteError::malformed_bitstream)?;
        let frag = FragmentationHeader::from_units(
            &annexb::split_length_prefixed(&out).map_err(RouteError::malformed_bitstream)?,
        );
        let adapted = packet.rebind(BitstreamFormat::Hvcc, PacketType::Nalu, out, Some(frag));
        Ok(Adapted::passthrough(Arc::new(adapted)))
    }

    fn hevc_hvcc_to_annexb(&mut self, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();

        if packet.packet_type() == PacketType::SequenceHeader {
            let sets = h265::parse_hvcc(payload).map_err(RouteError::malformed_bitstream)?;
            ctx.hevc = sets;
            let blob = ctx.hevc.to_annexb();
            let frag = FragmentationHeader::from_units(&annexb::split_annexb(&blob));
            let out = packet.rebind(
                BitstreamFormat::HevcAnnexB,
                PacketType::SequenceHeader,
                blob,
                Some(frag),
            );
            return Ok(Adapted::passthrough(Arc::new(out)));
        }

        let units =
            annexb::split_length_prefixed(payload).map_err(RouteError::malformed_bitstream)?;
        let mut has_irap = false;
        for (offset, length) in &units {
            let nal = &payload[*offset..*offset + *length];
            ctx.observe_hevc_nal(nal);
            if !nal.is_empty() && h265::is_irap(h265::nal_unit_type(nal[0])) {
                has_irap = true;
            }
        }

        let body =
            annexb::length_prefixed_to_annexb(payload).map_err(RouteError::malformed_bitstream)?;
        let blob = if has_irap && ctx.hevc.is_complete() {
            let params = ctx.hevc.to_annexb();
            let mut out = BytesMut::with_capacity(params.len() + body.len());
            out.put_slice(&params);
            out.put_slice(&body);
            out.freeze()
        } else {
            body
        };
        let frag = FragmentationHeader::from_units(&annexb::split_annexb(&blob));
        let adapted =
            packet.rebind(BitstreamFormat::HevcAnnexB, PacketType::Nalu, blob, Some(frag));
        Ok(Adapted::passthrough(Arc::new(adapted)))
    }

    fn aac_adts_to_raw(&mut self, track: &MediaTrack, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();

        if packet.packet_type() == PacketType::SequenceHeader {
            // Config already in raw form; keep it and remember it.
            ctx.asc = AudioSpecificConfig::parse(payload).ok();
            let out = packet.rebind(
                BitstreamFormat::AacRaw,
                PacketType::SequenceHeader,
                payload.clone(),
                None,
            );
            return Ok(Adapted::passthrough(Arc::new(out)));
        }

        let header = AdtsHeader::parse(payload).map_err(RouteError::malformed_bitstream)?;
        let raw = payload.slice(header.header_len()..header.frame_length);

        let mut config = None;
        if ctx.asc.is_none() {
            ctx.asc = Some(AudioSpecificConfig::from_adts(&header));
        }
        if !ctx.asc_published && track.decoder_config.is_none() {
            ctx.asc_published = true;
            let asc = ctx.asc.as_ref().unwrap();
            config = Some(Arc::new(packet.rebind(
                BitstreamFormat::AacRaw,
                PacketType::SequenceHeader,
                asc.serialize(),
                None,
            )));
        }

        let adapted = packet.rebind(BitstreamFormat::AacRaw, PacketType::Raw, raw, None);
        Ok(Adapted {
            config,
            packet: Some(Arc::new(adapted)),
        })
    }

    fn aac_raw_to_adts(&mut self, track: &MediaTrack, packet: &Arc<MediaPacket>) -> Result<Adapted> {
        let ctx = self.tracks.entry(packet.track_id()).or_default();
        let payload = packet.payload();

        if packet.packet_type() == PacketType::SequenceHeader {
            // ADTS carries the configuration in every frame header.
            ctx.asc = Some(AudioSpecificConfig::parse(payload).map_err(RouteError::malformed_bitstream)?);
            return Ok(Adapted {
                config: None,
                packet: None,
            });
        }

        if ctx.asc.is_none() {
            if let Some(config) = &track.decoder_config {
                ctx.asc = AudioSpecificConfig::parse(config).ok();
            }
        }
        let asc = ctx.asc.as_ref().ok_or_else(|| {
            RouteError::malformed_bitstream("no AudioSpecificConfig for ADTS framing")
        })?;

        let header = asc.adts_header(payload.len());
        let mut out = BytesMut::with_capacity(header.len() + payload.len());
        out.put_slice(&header);
        out.put_slice(payload);
        let adapted = packet.rebind(BitstreamFormat::AacAdts, PacketType::Raw, out.freeze(), None);
        Ok(Adapted::passthrough(Arc::new(adapted)))
    }
}
