use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
    Data,
}

/// On-the-wire framing of a packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitstreamFormat {
    H264AnnexB,
    H264Avcc,
    HevcAnnexB,
    Hvcc,
    AacAdts,
    AacRaw,
    Opus,
    Mp3,
    Amf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Decoder configuration (SPS/PPS, AudioSpecificConfig, OpusHead), never
    /// samples.
    SequenceHeader,
    Nalu,
    Raw,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFlag {
    Key,
    NonKey,
}

/// Offsets and lengths of the NAL unit bodies embedded in a packet payload,
/// so consumers do not re-scan for start codes or length prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationHeader {
    pub offsets: Vec<usize>,
    pub lengths: Vec<usize>,
}

impl FragmentationHeader {
    pub fn from_units(units: &[(usize, usize)]) -> Self {
        Self {
            offsets: units.iter().map(|(o, _)| *o).collect(),
            lengths: units.iter().map(|(_, l)| *l).collect(),
        }
    }
}

/// One unit of codec output for a single track. Immutable once handed to the
/// router; `rebind` is the only derivation operation and leaves the original
/// untouched.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    track_id: u32,
    media_type: MediaType,
    format: BitstreamFormat,
    packet_type: PacketType,
    pts: i64,
    dts: i64,
    duration: i64,
    flag: KeyFlag,
    payload: Bytes,
    fragmentation: Option<FragmentationHeader>,
}

impl MediaPacket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        track_id: u32,
        media_type: MediaType,
        format: BitstreamFormat,
        packet_type: PacketType,
        pts: i64,
        dts: i64,
        duration: i64,
        flag: KeyFlag,
        payload: Bytes,
    ) -> Self {
        debug_assert!(pts >= 0 && dts >= 0 && dts <= pts);
        Self {
            track_id,
            media_type,
            format,
            packet_type,
            pts,
            dts,
            duration,
            flag,
            payload,
            fragmentation: None,
        }
    }

    pub fn with_fragmentation(mut self, fragmentation: FragmentationHeader) -> Self {
        self.fragmentation = Some(fragmentation);
        self
    }

    /// Derive a packet in a different framing. Timing, track and key flag are
    /// carried over; the payload buffer is shared when the caller passes the
    /// original `Bytes` back.
    pub fn rebind(
        &self,
        format: BitstreamFormat,
        packet_type: PacketType,
        payload: Bytes,
        fragmentation: Option<FragmentationHeader>,
    ) -> Self {
        Self {
            track_id: self.track_id,
            media_type: self.media_type,
            format,
            packet_type,
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            flag: self.flag,
            payload,
            fragmentation,
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn format(&self) -> BitstreamFormat {
        self.format
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn flag(&self) -> KeyFlag {
        self.flag
    }

    pub fn is_key(&self) -> bool {
        self.flag == KeyFlag::Key
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn fragmentation(&self) -> Option<&FragmentationHeader> {
        self.fragmentation.as_ref()
    }
}
