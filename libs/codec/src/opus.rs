use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};

const MAGIC: &[u8; 8] = b"OpusHead";
const DEFAULT_PRE_SKIP: u16 = 3840; // 80 ms at 48 kHz

/// Opus identification header (RFC 7845 §5.1), used as the track's decoder
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusIdHeader {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
}

impl OpusIdHeader {
    pub fn new(channels: u8, input_sample_rate: u32) -> Self {
        Self {
            channels,
            pre_skip: DEFAULT_PRE_SKIP,
            input_sample_rate,
            output_gain: 0,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 19 || &data[0..8] != MAGIC {
            return Err(anyhow!("not an OpusHead header"));
        }
        if data[8] != 1 {
            return Err(anyhow!("unsupported OpusHead version {}", data[8]));
        }
        Ok(Self {
            channels: data[9],
            pre_skip: u16::from_le_bytes([data[10], data[11]]),
            input_sample_rate: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            output_gain: i16::from_le_bytes([data[16], data[17]]),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(19);
        out.put_slice(MAGIC);
        out.put_u8(1);
        out.put_u8(self.channels);
        out.put_u16_le(self.pre_skip);
        out.put_u32_le(self.input_sample_rate);
        out.put_i16_le(self.output_gain);
        out.put_u8(0); // mapping family: mono/stereo
        out.freeze()
    }
}
