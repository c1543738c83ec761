use std::collections::HashMap;

use super::{PlistError, Value};

const TRAILER_LEN: usize = 32;
const MAX_DEPTH: usize = 32;

/// Decode a binary plist (`bplist00`).
///
/// # Errors
/// Fails on truncated input, unknown object markers, or nesting past the
/// sanity limit (which also catches reference cycles).
pub fn decode(data: &[u8]) -> Result<Value, PlistError> {
    if !data.starts_with(b"bplist00") {
        return Err(PlistError::BadHeader);
    }
    if data.len() < 8 + TRAILER_LEN {
        return Err(PlistError::Truncated);
    }

    let trailer = &data[data.len() - TRAILER_LEN..];
    let offset_size = usize::from(trailer[6]);
    let ref_size = usize::from(trailer[7]);
    let num_objects = usize::try_from(u64::from_be_bytes(trailer[8..16].try_into().unwrap()))
        .map_err(|_| PlistError::Truncated)?;
    let root_index = usize::try_from(u64::from_be_bytes(trailer[16..24].try_into().unwrap()))
        .map_err(|_| PlistError::Truncated)?;
    let table_start = usize::try_from(u64::from_be_bytes(trailer[24..32].try_into().unwrap()))
        .map_err(|_| PlistError::Truncated)?;

    if offset_size == 0 || offset_size > 8 || ref_size == 0 || ref_size > 8 {
        return Err(PlistError::Truncated);
    }

    let table_len = num_objects
        .checked_mul(offset_size)
        .ok_or(PlistError::Truncated)?;
    let table_end = table_start
        .checked_add(table_len)
        .ok_or(PlistError::Truncated)?;
    if table_end > data.len() - TRAILER_LEN {
        return Err(PlistError::Truncated);
    }

    let mut offsets = Vec::with_capacity(num_objects);
    for i in 0..num_objects {
        let start = table_start + i * offset_size;
        offsets.push(read_be(&data[start..start + offset_size]));
    }

    let decoder = Decoder {
        data,
        offsets,
        ref_size,
    };
    decoder.object(root_index, 0)
}

fn read_be(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
}

struct Decoder<'a> {
    data: &'a [u8],
    offsets: Vec<usize>,
    ref_size: usize,
}

impl Decoder<'_> {
    fn object(&self, index: usize, depth: usize) -> Result<Value, PlistError> {
        if depth > MAX_DEPTH {
            return Err(PlistError::TooDeep);
        }
        let offset = *self.offsets.get(index).ok_or(PlistError::Truncated)?;
        let marker = *self.data.get(offset).ok_or(PlistError::Truncated)?;

        let kind = marker & 0xF0;
        let low = usize::from(marker & 0x0F);

        match kind {
            0x00 => match marker {
                0x08 => Ok(Value::Boolean(false)),
                0x09 => Ok(Value::Boolean(true)),
                _ => Err(PlistError::UnsupportedMarker(marker)),
            },
            // Integers: 2^low bytes, big-endian
            0x10 => {
                let width = 1usize << low;
                if width > 8 {
                    return Err(PlistError::UnsupportedMarker(marker));
                }
                let bytes = self.slice(offset + 1, width)?;
                let mut buf = [0u8; 8];
                buf[8 - width..].copy_from_slice(bytes);
                #[allow(clippy::cast_possible_wrap)]
                Ok(Value::Integer(u64::from_be_bytes(buf) as i64))
            }
            0x20 => match low {
                2 => {
                    let bytes = self.slice(offset + 1, 4)?;
                    Ok(Value::Real(f64::from(f32::from_be_bytes(
                        bytes.try_into().unwrap(),
                    ))))
                }
                3 => {
                    let bytes = self.slice(offset + 1, 8)?;
                    Ok(Value::Real(f64::from_be_bytes(bytes.try_into().unwrap())))
                }
                _ => Err(PlistError::UnsupportedMarker(marker)),
            },
            0x30 => {
                let bytes = self.slice(offset + 1, 8)?;
                Ok(Value::Date(f64::from_be_bytes(bytes.try_into().unwrap())))
            }
            0x40 => {
                let (len, start) = self.length(offset, low)?;
                Ok(Value::Data(self.slice(start, len)?.to_vec()))
            }
            0x50 => {
                let (len, start) = self.length(offset, low)?;
                let bytes = self.slice(start, len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| PlistError::BadString)?;
                Ok(Value::String(s.to_string()))
            }
            0x60 => {
                let (len, start) = self.length(offset, low)?;
                let bytes = self.slice(start, len * 2)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map(Value::String)
                    .map_err(|_| PlistError::BadString)
            }
            // UIDs only show up in keyed archives; surface them as ints.
            0x80 => {
                let bytes = self.slice(offset + 1, low + 1)?;
                #[allow(clippy::cast_possible_wrap)]
                Ok(Value::Integer(read_be(bytes) as i64))
            }
            0xA0 | 0xC0 => {
                let (len, start) = self.length(offset, low)?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    let r = self.object_ref(start + i * self.ref_size)?;
                    items.push(self.object(r, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            0xD0 => {
                let (len, start) = self.length(offset, low)?;
                let mut entries = HashMap::with_capacity(len);
                for i in 0..len {
                    let key_ref = self.object_ref(start + i * self.ref_size)?;
                    let val_ref = self.object_ref(start + (len + i) * self.ref_size)?;
                    let Value::String(key) = self.object(key_ref, depth + 1)? else {
                        return Err(PlistError::BadKey);
                    };
                    entries.insert(key, self.object(val_ref, depth + 1)?);
                }
                Ok(Value::Dictionary(entries))
            }
            _ => Err(PlistError::UnsupportedMarker(marker)),
        }
    }

    /// Resolve the 0x0F length escape: a following integer object carries
    /// the real count.
    fn length(&self, offset: usize, low: usize) -> Result<(usize, usize), PlistError> {
        if low != 0x0F {
            return Ok((low, offset + 1));
        }
        let marker = *self.data.get(offset + 1).ok_or(PlistError::Truncated)?;
        if marker & 0xF0 != 0x10 {
            return Err(PlistError::UnsupportedMarker(marker));
        }
        let width = 1usize << (marker & 0x0F);
        if width > 8 {
            return Err(PlistError::UnsupportedMarker(marker));
        }
        let bytes = self.slice(offset + 2, width)?;
        Ok((read_be(bytes), offset + 2 + width))
    }

    fn object_ref(&self, offset: usize) -> Result<usize, PlistError> {
        Ok(read_be(self.slice(offset, self.ref_size)?))
    }

    fn slice(&self, start: usize, len: usize) -> Result<&[u8], PlistError> {
        let end = start.checked_add(len).ok_or(PlistError::Truncated)?;
        self.data.get(start..end).ok_or(PlistError::Truncated)
    }
}
