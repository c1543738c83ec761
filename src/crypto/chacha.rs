use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce as AeadNonce};

use super::{CHACHA_KEY_LEN, CHACHA_NONCE_LEN, CryptoError};

/// 12-byte ChaCha20-Poly1305 nonce.
#[derive(Clone, Copy)]
pub struct Nonce([u8; CHACHA_NONCE_LEN]);

impl Nonce {
    /// Wrap raw nonce bytes.
    ///
    /// # Errors
    /// Fails if `bytes` is not exactly 12 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; CHACHA_NONCE_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: CHACHA_NONCE_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Counter nonce: the low 8 bytes carry the little-endian counter.
    ///
    /// Both the control channel envelope and the audio packet cipher count
    /// messages this way.
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; CHACHA_NONCE_LEN];
        arr[4..].copy_from_slice(&counter.to_le_bytes());
        Self(arr)
    }

    /// Label nonce: an ASCII tag right-aligned in the 12 bytes, as the
    /// pairing messages use (`PV-Msg02`, `PS-Msg05`, ...).
    #[must_use]
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut arr = [0u8; CHACHA_NONCE_LEN];
        arr[4..].copy_from_slice(label);
        Self(arr)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHACHA_NONCE_LEN] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD keyed with a 32-byte key.
pub struct ChaChaCipher {
    cipher: ChaCha20Poly1305,
}

impl ChaChaCipher {
    /// Build a cipher from key material.
    ///
    /// # Errors
    /// Fails if `key` is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: CHACHA_KEY_LEN,
                actual: key.len(),
            })?;
        Ok(Self { cipher })
    }

    /// Seal `plaintext`; the 16-byte tag is appended.
    ///
    /// # Errors
    /// Returns [`CryptoError::EncryptionFailed`] on AEAD failure.
    pub fn seal(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                AeadNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open `ciphertext` (with trailing tag) and verify the tag.
    ///
    /// # Errors
    /// Returns [`CryptoError::DecryptionFailed`] if authentication fails.
    pub fn open(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                AeadNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
