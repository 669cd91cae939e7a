use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const ADTS_HEADER_LEN: usize = 7;
pub const ADTS_HEADER_LEN_WITH_CRC: usize = 9;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Fixed+variable header of one ADTS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsHeader {
    /// `profile` field: audio_object_type - 1.
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    pub protection_absent: bool,
    /// Whole frame length, header included.
    pub frame_length: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ADTS_HEADER_LEN {
            return Err(anyhow!("ADTS frame too short: {} bytes", data.len()));
        }
        if data[0] != 0xFF || (data[1] & 0xF0) != 0xF0 {
            return Err(anyhow!("missing ADTS syncword"));
        }
        let protection_absent = data[1] & 0x01 == 1;
        let profile = (data[2] >> 6) & 0x03;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        if sampling_frequency_index as usize >= SAMPLE_RATES.len() {
            return Err(anyhow!(
                "invalid ADTS sampling frequency index {}",
                sampling_frequency_index
            ));
        }
        let channel_configuration = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        let header_len = if protection_absent {
            ADTS_HEADER_LEN
        } else {
            ADTS_HEADER_LEN_WITH_CRC
        };
        if frame_length < header_len || frame_length > data.len() {
            return Err(anyhow!(
                "ADTS frame length {} inconsistent with buffer {}",
                frame_length,
                data.len()
            ));
        }
        Ok(Self {
            profile,
            sampling_frequency_index,
            channel_configuration,
            protection_absent,
            frame_length,
        })
    }

    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            ADTS_HEADER_LEN
        } else {
            ADTS_HEADER_LEN_WITH_CRC
        }
    }
}

/// Two-byte AudioSpecificConfig (ISO/IEC 14496-3 1.6.2.1), the subset
/// without extension fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(anyhow!("AudioSpecificConfig too short"));
        }
        let object_type = (data[0] >> 3) & 0x1F;
        let sampling_frequency_index = ((data[0] & 0x07) << 1) | ((data[1] >> 7) & 0x01);
        let channel_configuration = (data[1] >> 3) & 0x0F;
        if object_type == 0 || object_type == 0x1F {
            return Err(anyhow!("unsupported audio object type {}", object_type));
        }
        if sampling_frequency_index as usize >= SAMPLE_RATES.len() {
            return Err(anyhow!(
                "invalid sampling frequency index {}",
                sampling_frequency_index
            ));
        }
        Ok(Self {
            object_type,
            sampling_frequency_index,
            channel_configuration,
        })
    }

    pub fn from_adts(header: &AdtsHeader) -> Self {
        Self {
            object_type: header.profile + 1,
            sampling_frequency_index: header.sampling_frequency_index,
            channel_configuration: header.channel_configuration,
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2);
        out.put_u8((self.object_type << 3) | ((self.sampling_frequency_index >> 1) & 0x07));
        out.put_u8(((self.sampling_frequency_index & 0x01) << 7) | (self.channel_configuration << 3));
        out.freeze()
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sampling_frequency_index as usize]
    }

    /// Build the 7-byte ADTS header for one raw frame of `payload_len` bytes.
    pub fn adts_header(&self, payload_len: usize) -> Bytes {
        let frame_length = payload_len + ADTS_HEADER_LEN;
        let profile = self.object_type.saturating_sub(1) & 0x03;
        let mut out = BytesMut::with_capacity(ADTS_HEADER_LEN);
        out.put_u8(0xFF);
        out.put_u8(0xF1); // MPEG-4, layer 0, no CRC
        out.put_u8((profile << 6) | ((self.sampling_frequency_index & 0x0F) << 2)
            | ((self.channel_configuration >> 2) & 0x01));
        out.put_u8(((self.channel_configuration & 0x03) << 6)
            | (((frame_length >> 11) & 0x03) as u8));
        out.put_u8(((frame_length >> 3) & 0xFF) as u8);
        out.put_u8((((frame_length & 0x07) as u8) << 5) | 0x1F);
        out.put_u8(0xFC);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adts_round_trip() {
        // AAC-LC, 48 kHz, stereo
        let asc = AudioSpecificConfig {
            object_type: 2,
            sampling_frequency_index: 3,
            channel_configuration: 2,
        };
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let header = asc.adts_header(payload.len());
        assert_eq!(header.len(), ADTS_HEADER_LEN);

        let mut frame = header.to_vec();
        frame.extend_from_slice(&payload);
        let parsed = AdtsHeader::parse(&frame).unwrap();
        assert_eq!(parsed.profile, 1);
        assert_eq!(parsed.sampling_frequency_index, 3);
        assert_eq!(parsed.channel_configuration, 2);
        assert!(parsed.protection_absent);
        assert_eq!(parsed.frame_length, frame.len());

        let back = AudioSpecificConfig::from_adts(&parsed);
        assert_eq!(back, asc);
    }

    #[test]
    fn test_asc_round_trip() {
        let asc = AudioSpecificConfig {
            object_type: 2,
            sampling_frequency_index: 4,
            channel_configuration: 1,
        };
        let bytes = asc.serialize();
        assert_eq!(&bytes[..], &[0x12, 0x08]);
        let parsed = AudioSpecificConfig::parse(&bytes).unwrap();
        assert_eq!(parsed, asc);
        assert_eq!(parsed.sample_rate(), 44100);
    }

    #[test]
    fn test_rejects_missing_syncword() {
        assert!(AdtsHeader::parse(&[0x00; 8]).is_err());
    }
}
