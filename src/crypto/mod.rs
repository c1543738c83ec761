//! Cryptographic primitives behind the pairing handshakes and the audio
//! packet cipher.

mod chacha;
mod hkdf;
mod keys;
mod srp;

#[cfg(test)]
mod tests;

pub use self::chacha::{ChaChaCipher, Nonce};
pub use self::hkdf::HkdfSha512;
pub use self::keys::{
    EdKeyPair, EdPublicKey, EdSignature, X25519KeyPair, X25519PublicKey, X25519SharedSecret,
};
pub use self::srp::{SrpClient, SrpSessionKey, SrpVerifier};

use thiserror::Error;

/// ChaCha20-Poly1305 key length
pub const CHACHA_KEY_LEN: usize = 32;
/// ChaCha20-Poly1305 nonce length
pub const CHACHA_NONCE_LEN: usize = 12;
/// ChaCha20-Poly1305 tag length
pub const CHACHA_TAG_LEN: usize = 16;
/// Curve25519 key length (X25519 and Ed25519 alike)
pub const CURVE_KEY_LEN: usize = 32;
/// SRP public key / group size in bytes (3072-bit group)
pub const SRP_GROUP_LEN: usize = 384;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key or nonce material has the wrong size.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Provided length
        actual: usize,
    },

    /// A public key failed point validation.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// An Ed25519 signature failed to parse or verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD seal failure.
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD open failure (bad tag, wrong key, truncation).
    #[error("decryption failed")]
    DecryptionFailed,

    /// HKDF expand failed (requested length too large).
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// SRP math or proof failure.
    #[error("SRP failure: {0}")]
    Srp(&'static str),
}
