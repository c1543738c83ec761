//! The three `AirPlay` 2 pairing ceremonies and the ciphers they install.
//!
//! Every handshake is an exchange of TLV8 bodies over POST requests; the
//! RTSP sequencer drives the exchanges and this module owns the state in
//! between. A completed handshake yields a shared secret: 64 bytes for the
//! SRP-based ceremonies, 32 for pair-verify. The first 32 bytes always key
//! the audio packet cipher; the control channel keys are derived here.

pub mod setup;
pub mod storage;
pub mod tlv;
pub mod transient;
pub mod verify;


pub use setup::PairSetup;
pub use storage::{FileKeyStore, KeyStore, MemoryKeyStore, StoredPairing};
pub use tlv::{TlvReader, TlvType, TlvWriter};
pub use transient::TransientPair;
pub use verify::PairVerify;

use crate::crypto::{ChaChaCipher, CryptoError, HkdfSha512, Nonce};

use thiserror::Error;

/// Username both SRP ceremonies present to the receiver.
pub const SRP_USERNAME: &[u8] = b"Pair-Setup";

/// Fixed PIN for transient pairing.
pub const TRANSIENT_PIN: &[u8] = b"3939";

/// Pairing handshake errors.
#[derive(Debug, Error)]
pub enum PairingError {
    /// Malformed TLV8 body.
    #[error("malformed TLV body")]
    BadTlv,

    /// A mandatory TLV item is missing.
    #[error("missing TLV item {0:?}")]
    MissingTlv(TlvType),

    /// The handshake state number is not the expected one.
    #[error("wrong pairing state: expected M{expected}, got M{actual}")]
    WrongState {
        /// State we waited for
        expected: u8,
        /// State the receiver sent
        actual: u8,
    },

    /// The receiver reported a pairing error code.
    #[error("receiver reported pairing error {code}")]
    DeviceError {
        /// TLV error code
        code: u8,
    },

    /// The context was driven out of order (a bug in the caller).
    #[error("pairing context used out of order")]
    OutOfOrder,

    /// A stored auth key failed to parse.
    #[error("stored auth key is invalid")]
    BadAuthKey,

    /// The receiver's long-term key signature did not verify.
    #[error("receiver signature rejected")]
    SignatureRejected,

    /// Underlying crypto failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Progress of a handshake after consuming a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    /// More request/response round trips remain.
    InProgress,
    /// The handshake is complete; the secret is available.
    Complete,
}

/// One in-flight pairing handshake, driven as an opaque object:
/// `make_request` produces the next body to POST, `read_response` consumes
/// the answer, `shared_secret` yields the result once complete.
pub enum PairContext {
    /// SRP with the fixed transient PIN (2 round trips)
    Transient(TransientPair),
    /// SRP with a user PIN plus long-term key exchange (3 round trips)
    Setup(PairSetup),
    /// Verification against persisted keys (2 round trips)
    Verify(PairVerify),
}

impl PairContext {
    /// Build the next request body.
    ///
    /// # Errors
    /// Fails when the context is driven out of order or on crypto failure.
    pub fn make_request(&mut self) -> Result<Vec<u8>, PairingError> {
        match self {
            PairContext::Transient(ctx) => ctx.make_request(),
            PairContext::Setup(ctx) => ctx.make_request(),
            PairContext::Verify(ctx) => ctx.make_request(),
        }
    }

    /// Consume a response body.
    ///
    /// # Errors
    /// Propagates handshake failures (bad state, device error, bad proof).
    pub fn read_response(&mut self, body: &[u8]) -> Result<PairStatus, PairingError> {
        match self {
            PairContext::Transient(ctx) => ctx.read_response(body),
            PairContext::Setup(ctx) => ctx.read_response(body),
            PairContext::Verify(ctx) => ctx.read_response(body),
        }
    }

    /// The shared secret, once [`PairStatus::Complete`] was returned.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        match self {
            PairContext::Transient(ctx) => ctx.shared_secret(),
            PairContext::Setup(ctx) => ctx.shared_secret(),
            PairContext::Verify(ctx) => ctx.shared_secret(),
        }
    }
}

/// Control channel cipher pair derived from a shared secret.
///
/// Wraps whole RTSP messages in an AEAD envelope: little-endian `u16`
/// length prefix (authenticated as AAD), ciphertext, 16-byte tag. Each
/// direction counts its own messages for the nonce.
pub struct ChannelCipher {
    seal: ChaChaCipher,
    open: ChaChaCipher,
    seal_count: u64,
    open_count: u64,
}

impl ChannelCipher {
    /// Largest plaintext a single envelope may carry.
    pub const MAX_BLOCK: usize = 0x400;

    /// Derive both direction keys from the shared secret.
    ///
    /// # Errors
    /// Fails only if key derivation fails.
    pub fn from_shared_secret(secret: &[u8]) -> Result<Self, PairingError> {
        let hkdf = HkdfSha512::new(Some(b"Control-Salt"), secret);
        let write_key: [u8; 32] = hkdf.expand(b"Control-Write-Encryption-Key")?;
        let read_key: [u8; 32] = hkdf.expand(b"Control-Read-Encryption-Key")?;

        Ok(Self {
            seal: ChaChaCipher::new(&write_key)?,
            open: ChaChaCipher::new(&read_key)?,
            seal_count: 0,
            open_count: 0,
        })
    }

    /// Seal an outgoing message into one or more envelopes.
    ///
    /// # Errors
    /// Fails on AEAD failure.
    pub fn seal_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, PairingError> {
        let mut out = Vec::with_capacity(plaintext.len() + 64);
        for block in plaintext.chunks(Self::MAX_BLOCK) {
            #[allow(clippy::cast_possible_truncation)]
            let len = (block.len() as u16).to_le_bytes();
            let nonce = Nonce::from_counter(self.seal_count);
            self.seal_count += 1;

            let sealed = self.seal.seal(&nonce, &len, block)?;
            out.extend_from_slice(&len);
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }

    /// Open one envelope from `buf`, returning the plaintext and how many
    /// input bytes were consumed. `None` means more bytes are needed.
    ///
    /// # Errors
    /// Fails if authentication fails.
    pub fn open_block(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, PairingError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let len = usize::from(u16::from_le_bytes([buf[0], buf[1]]));
        let total = 2 + len + crate::crypto::CHACHA_TAG_LEN;
        if buf.len() < total {
            return Ok(None);
        }

        let nonce = Nonce::from_counter(self.open_count);
        let plaintext = self.open.open(&nonce, &buf[..2], &buf[2..total])?;
        self.open_count += 1;
        Ok(Some((plaintext, total)))
    }
}

/// Render a persisted auth key: our Ed25519 seed followed by the
/// receiver's long-term public key, hex encoded.
#[must_use]
pub fn auth_key_export(our_seed: &[u8; 32], device_ltpk: &[u8; 32]) -> String {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(our_seed);
    buf.extend_from_slice(device_ltpk);
    hex::encode(buf)
}

/// Parse a persisted auth key back into `(our_seed, device_ltpk)`.
///
/// # Errors
/// Fails if the string is not 128 hex characters.
pub fn auth_key_import(auth_key: &str) -> Result<([u8; 32], [u8; 32]), PairingError> {
    let bytes = hex::decode(auth_key).map_err(|_| PairingError::BadAuthKey)?;
    if bytes.len() != 64 {
        return Err(PairingError::BadAuthKey);
    }
    let mut seed = [0u8; 32];
    let mut ltpk = [0u8; 32];
    seed.copy_from_slice(&bytes[..32]);
    ltpk.copy_from_slice(&bytes[32..]);
    Ok((seed, ltpk))
}
