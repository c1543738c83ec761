use std::collections::HashMap;

use super::PairingError;

/// TLV8 item types used by the pairing ceremonies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Pairing method selector
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// SRP salt
    Salt = 0x02,
    /// Public key (SRP A/B, X25519, Ed25519 depending on message)
    PublicKey = 0x03,
    /// SRP proof
    Proof = 0x04,
    /// Encrypted sub-TLV
    EncryptedData = 0x05,
    /// Handshake state number (M1..M6)
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Ed25519 signature
    Signature = 0x0A,
    /// Pairing type flags (bit 4 = transient)
    Flags = 0x13,
}

/// Pairing method selector values.
pub mod methods {
    /// Plain pair-setup (also used transiently)
    pub const PAIR_SETUP: u8 = 0;
}

/// Flag bits for [`TlvType::Flags`].
pub mod flags {
    /// Request a transient (non-persisted) pairing
    pub const TRANSIENT: u8 = 0x10;
}

/// TLV8 writer. Values longer than 255 bytes are fragmented into
/// consecutive items of the same type, as the format requires.
#[derive(Default)]
pub struct TlvWriter {
    buffer: Vec<u8>,
}

impl TlvWriter {
    /// Fresh writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    #[must_use]
    pub fn put(mut self, tlv_type: TlvType, value: &[u8]) -> Self {
        if value.is_empty() {
            self.buffer.push(tlv_type as u8);
            self.buffer.push(0);
            return self;
        }
        for chunk in value.chunks(255) {
            self.buffer.push(tlv_type as u8);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }
        self
    }

    /// Append a one-byte item.
    #[must_use]
    pub fn put_u8(self, tlv_type: TlvType, value: u8) -> Self {
        self.put(tlv_type, &[value])
    }

    /// Append the handshake state item.
    #[must_use]
    pub fn state(self, state: u8) -> Self {
        self.put_u8(TlvType::State, state)
    }

    /// Encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Parsed TLV8 message. Fragmented items are reassembled.
pub struct TlvReader {
    items: HashMap<u8, Vec<u8>>,
}

impl TlvReader {
    /// Parse a TLV8 buffer.
    ///
    /// # Errors
    /// Fails on a truncated item.
    pub fn parse(data: &[u8]) -> Result<Self, PairingError> {
        let mut items: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut pos = 0;

        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(PairingError::BadTlv);
            }
            let tlv_type = data[pos];
            let len = usize::from(data[pos + 1]);
            pos += 2;

            let value = data.get(pos..pos + len).ok_or(PairingError::BadTlv)?;
            pos += len;

            items.entry(tlv_type).or_default().extend_from_slice(value);
        }

        Ok(Self { items })
    }

    /// Value of an item, if present.
    #[must_use]
    pub fn get(&self, tlv_type: TlvType) -> Option<&[u8]> {
        self.items.get(&(tlv_type as u8)).map(Vec::as_slice)
    }

    /// Value of a mandatory item.
    ///
    /// # Errors
    /// Fails if the item is absent.
    pub fn require(&self, tlv_type: TlvType) -> Result<&[u8], PairingError> {
        self.get(tlv_type).ok_or(PairingError::MissingTlv(tlv_type))
    }

    /// The handshake state item, validated against the expected value.
    ///
    /// # Errors
    /// Fails if absent or not the expected state.
    pub fn expect_state(&self, expected: u8) -> Result<(), PairingError> {
        let value = self.require(TlvType::State)?;
        if value != [expected] {
            return Err(PairingError::WrongState {
                expected,
                actual: value.first().copied().unwrap_or(0),
            });
        }
        Ok(())
    }

    /// Device error code, if the receiver reported one.
    #[must_use]
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }
}
