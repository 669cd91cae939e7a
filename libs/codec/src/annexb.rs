use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Length of the start code at `data[offset..]`, if one begins there.
fn start_code_at(data: &[u8], offset: usize) -> Option<usize> {
    let rest = &data[offset..];
    if rest.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if rest.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// Split an Annex-B buffer into `(offset, length)` pairs covering each NAL
/// unit body (start codes excluded). Returns an empty vec when no start code
/// is found.
pub fn split_annexb(data: &[u8]) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut offset = 0usize;
    let mut current: Option<usize> = None;
    while offset < data.len() {
        match start_code_at(data, offset) {
            Some(prefix) => {
                if let Some(start) = current.take() {
                    units.push((start, offset - start));
                }
                offset += prefix;
                current = Some(offset);
            }
            None => offset += 1,
        }
    }
    if let Some(start) = current {
        if start < data.len() {
            units.push((start, data.len() - start));
        }
    }
    units
}

/// Split a 4-byte-length-prefixed buffer into `(offset, length)` pairs
/// covering each NAL unit body (length prefixes excluded).
pub fn split_length_prefixed(data: &[u8]) -> Result<Vec<(usize, usize)>> {
    let mut units = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        if data.len() - offset < 4 {
            return Err(anyhow!("truncated NAL length prefix"));
        }
        let length = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4;
        if data.len() - offset < length {
            return Err(anyhow!(
                "NAL length {} exceeds remaining buffer {}",
                length,
                data.len() - offset
            ));
        }
        units.push((offset, length));
        offset += length;
    }
    Ok(units)
}

/// Rewrite Annex-B start codes into 4-byte big-endian length prefixes.
/// This assumes a length size of 4 bytes (lengthSizeMinusOne == 3).
pub fn annexb_to_length_prefixed(data: &[u8]) -> Result<Bytes> {
    let units = split_annexb(data);
    if units.is_empty() {
        return Err(anyhow!("no start code in Annex-B buffer"));
    }
    let mut out = BytesMut::with_capacity(data.len() + units.len() * 4);
    for (offset, length) in units {
        out.put_u32(length as u32);
        out.put_slice(&data[offset..offset + length]);
    }
    Ok(out.freeze())
}

/// Rewrite 4-byte length prefixes into Annex-B start codes.
pub fn length_prefixed_to_annexb(data: &[u8]) -> Result<Bytes> {
    let units = split_length_prefixed(data)?;
    let mut out = BytesMut::with_capacity(data.len());
    for (offset, length) in units {
        out.put_slice(&START_CODE);
        out.put_slice(&data[offset..offset + length]);
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_annexb_mixed_prefixes() {
        let data = [
            0, 0, 0, 1, 0x67, 0xAA, // 4-byte prefix
            0, 0, 1, 0x68, 0xBB, 0xCC, // 3-byte prefix
        ];
        let units = split_annexb(&data);
        assert_eq!(units, vec![(4, 2), (9, 3)]);
    }

    #[test]
    fn test_round_trip() {
        let data = [0, 0, 0, 1, 0x65, 0x11, 0x22, 0, 0, 0, 1, 0x41, 0x33];
        let avcc = annexb_to_length_prefixed(&data).unwrap();
        assert_eq!(&avcc[..], &[0, 0, 0, 3, 0x65, 0x11, 0x22, 0, 0, 0, 2, 0x41, 0x33]);
        let annexb = length_prefixed_to_annexb(&avcc).unwrap();
        assert_eq!(&annexb[..], &data[..]);
    }

    #[test]
    fn test_no_start_code_is_error() {
        assert!(annexb_to_length_prefixed(&[0x65, 0x11]).is_err());
    }

    #[test]
    fn test_truncated_length_prefix() {
        assert!(split_length_prefixed(&[0, 0, 0, 9, 0x65]).is_err());
    }
}
