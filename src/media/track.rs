use bytes::Bytes;

use super::packet::{BitstreamFormat, MediaType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    H264,
    H265,
    Aac,
    Opus,
    Mp3,
    Data,
}

/// Rational time unit of a track; pts/dts/duration of its packets count in
/// `num/den` seconds. The router never rescales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub channels: u8,
    pub layout: ChannelLayout,
}

/// One elementary stream inside a `MediaStream`. Immutable between stream
/// creation and a stream update.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: u32,
    pub media_type: MediaType,
    pub codec: CodecId,
    pub timebase: Timebase,
    /// Framing the connector emits for this track.
    pub origin_format: BitstreamFormat,
    /// Codec-specific decoder configuration: avcC/hvcC record,
    /// AudioSpecificConfig, or OpusHead.
    pub decoder_config: Option<Bytes>,
    pub video: Option<VideoProfile>,
    pub audio: Option<AudioProfile>,
    pub bitrate: u32,
}

impl MediaTrack {
    pub fn new(
        id: u32,
        media_type: MediaType,
        codec: CodecId,
        timebase: Timebase,
        origin_format: BitstreamFormat,
    ) -> Self {
        Self {
            id,
            media_type,
            codec,
            timebase,
            origin_format,
            decoder_config: None,
            video: None,
            audio: None,
            bitrate: 0,
        }
    }

    pub fn with_decoder_config(mut self, config: Bytes) -> Self {
        self.decoder_config = Some(config);
        self
    }

    pub fn with_video(mut self, profile: VideoProfile) -> Self {
        self.video = Some(profile);
        self
    }

    pub fn with_audio(mut self, profile: AudioProfile) -> Self {
        self.audio = Some(profile);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}
