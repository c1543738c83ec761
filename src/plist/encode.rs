use super::{PlistError, Value};

// Object references are two bytes; no AirPlay message comes anywhere near
// 65535 objects.
const REF_SIZE: u8 = 2;

/// Encode a value as a binary plist (`bplist00`).
///
/// # Errors
/// Fails if the value tree has more than 65535 objects.
pub fn encode(value: &Value) -> Result<Vec<u8>, PlistError> {
    let mut encoder = Encoder::default();
    let root = encoder.add_value(value)?;

    if encoder.offsets.len() > usize::from(u16::MAX) {
        return Err(PlistError::TooManyObjects(encoder.offsets.len()));
    }

    let mut out = Vec::with_capacity(encoder.objects.len() + 64);
    out.extend_from_slice(b"bplist00");

    let objects_start = out.len();
    out.extend_from_slice(&encoder.objects);

    let offset_table_offset = out.len();
    let offset_size = int_width((objects_start + encoder.objects.len()) as u64);
    for &off in &encoder.offsets {
        write_sized_be(&mut out, objects_start as u64 + off, offset_size);
    }

    // Trailer: 6 pad bytes, offset size, ref size, object count, root
    // index, offset table start.
    out.extend_from_slice(&[0u8; 6]);
    out.push(offset_size);
    out.push(REF_SIZE);
    out.extend_from_slice(&(encoder.offsets.len() as u64).to_be_bytes());
    out.extend_from_slice(&(root as u64).to_be_bytes());
    out.extend_from_slice(&(offset_table_offset as u64).to_be_bytes());

    Ok(out)
}

fn int_width(max: u64) -> u8 {
    match max {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

fn write_sized_be(out: &mut Vec<u8>, value: u64, width: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - usize::from(width)..]);
}

#[derive(Default)]
struct Encoder {
    objects: Vec<u8>,
    offsets: Vec<u64>,
}

impl Encoder {
    /// Children are appended before their container, so the root ends up
    /// with the highest index; the trailer records it either way.
    fn add_value(&mut self, value: &Value) -> Result<usize, PlistError> {
        let body = match value {
            Value::Array(items) => {
                let refs = items
                    .iter()
                    .map(|item| self.add_value(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(Self::container_body(0xA0, &refs, &[]))
            }
            Value::Dictionary(entries) => {
                // Stable key order keeps the output deterministic.
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();

                let mut key_refs = Vec::with_capacity(keys.len());
                let mut val_refs = Vec::with_capacity(keys.len());
                for key in keys {
                    key_refs.push(self.add_value(&Value::String(key.clone()))?);
                    val_refs.push(self.add_value(&entries[key])?);
                }
                Some(Self::container_body(0xD0, &key_refs, &val_refs))
            }
            _ => None,
        };

        self.offsets.push(self.objects.len() as u64);
        let index = self.offsets.len() - 1;

        if let Some(body) = body {
            self.objects.extend_from_slice(&body);
        } else {
            self.scalar_body(value);
        }

        Ok(index)
    }

    fn scalar_body(&mut self, value: &Value) {
        match value {
            Value::Boolean(b) => self.objects.push(if *b { 0x09 } else { 0x08 }),
            Value::Integer(i) => self.integer_body(*i),
            Value::Real(f) => {
                self.objects.push(0x23);
                self.objects.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Date(d) => {
                self.objects.push(0x33);
                self.objects.extend_from_slice(&d.to_bits().to_be_bytes());
            }
            Value::String(s) => self.string_body(s),
            Value::Data(d) => {
                self.marker_with_len(0x40, d.len());
                self.objects.extend_from_slice(d);
            }
            Value::Array(_) | Value::Dictionary(_) => unreachable!(),
        }
    }

    fn integer_body(&mut self, value: i64) {
        if value < 0 {
            // Negative integers are always eight bytes in bplist.
            self.objects.push(0x13);
            self.objects.extend_from_slice(&value.to_be_bytes());
        } else if let Ok(v) = u8::try_from(value) {
            self.objects.push(0x10);
            self.objects.push(v);
        } else if let Ok(v) = u16::try_from(value) {
            self.objects.push(0x11);
            self.objects.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = u32::try_from(value) {
            self.objects.push(0x12);
            self.objects.extend_from_slice(&v.to_be_bytes());
        } else {
            self.objects.push(0x13);
            self.objects.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn string_body(&mut self, s: &str) {
        if s.is_ascii() {
            self.marker_with_len(0x50, s.len());
            self.objects.extend_from_slice(s.as_bytes());
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.marker_with_len(0x60, units.len());
            for unit in units {
                self.objects.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }

    /// Marker nibble + length, with the 0x0F escape for long payloads.
    fn marker_with_len(&mut self, marker: u8, len: usize) {
        if len < 15 {
            self.objects.push(marker | len as u8);
        } else {
            self.objects.push(marker | 0x0F);
            self.integer_body(len as i64);
        }
    }

    fn container_body(marker: u8, first_refs: &[usize], second_refs: &[usize]) -> Vec<u8> {
        let count = first_refs.len();
        let mut body = Vec::with_capacity(2 + (first_refs.len() + second_refs.len()) * 2);
        if count < 15 {
            body.push(marker | count as u8);
        } else {
            body.push(marker | 0x0F);
            if let Ok(v) = u8::try_from(count) {
                body.push(0x10);
                body.push(v);
            } else {
                body.push(0x11);
                body.extend_from_slice(&(count as u16).to_be_bytes());
            }
        }
        for &r in first_refs.iter().chain(second_refs) {
            body.extend_from_slice(&(r as u16).to_be_bytes());
        }
        body
    }
}
