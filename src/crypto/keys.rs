use ed25519_dalek::{Signer, Verifier};
use x25519_dalek::{PublicKey, StaticSecret};

use super::{CURVE_KEY_LEN, CryptoError};

fn key_array(bytes: &[u8]) -> Result<[u8; CURVE_KEY_LEN], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: CURVE_KEY_LEN,
        actual: bytes.len(),
    })
}

/// X25519 key pair for the ephemeral Diffie-Hellman exchanges.
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyPair {
    /// Generate a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Our public key.
    #[must_use]
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey {
            inner: self.public,
        }
    }

    /// Diffie-Hellman with the peer's public key.
    #[must_use]
    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> X25519SharedSecret {
        X25519SharedSecret {
            bytes: self.secret.diffie_hellman(&peer.inner).to_bytes(),
        }
    }
}

/// X25519 public key.
#[derive(Clone, Copy)]
pub struct X25519PublicKey {
    inner: PublicKey,
}

impl X25519PublicKey {
    /// Parse from 32 raw bytes.
    ///
    /// # Errors
    /// Fails on wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            inner: PublicKey::from(key_array(bytes)?),
        })
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CURVE_KEY_LEN] {
        self.inner.as_bytes()
    }
}

/// X25519 shared secret; zeroed on drop.
pub struct X25519SharedSecret {
    bytes: [u8; CURVE_KEY_LEN],
}

impl X25519SharedSecret {
    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CURVE_KEY_LEN] {
        &self.bytes
    }
}

impl Drop for X25519SharedSecret {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.bytes.zeroize();
    }
}

/// Ed25519 signing key pair (our long-term pairing identity).
pub struct EdKeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl EdKeyPair {
    /// Generate a fresh identity.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Rebuild from a stored 32-byte seed.
    ///
    /// # Errors
    /// Fails on wrong length.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&key_array(seed)?),
        })
    }

    /// The seed bytes, for persistence.
    #[must_use]
    pub fn seed(&self) -> [u8; CURVE_KEY_LEN] {
        self.signing_key.to_bytes()
    }

    /// Our verifying key.
    #[must_use]
    pub fn public_key(&self) -> EdPublicKey {
        EdPublicKey {
            inner: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> EdSignature {
        EdSignature {
            inner: self.signing_key.sign(message),
        }
    }
}

/// Ed25519 verifying key (the receiver's long-term identity).
#[derive(Clone)]
pub struct EdPublicKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl EdPublicKey {
    /// Parse from 32 raw bytes.
    ///
    /// # Errors
    /// Fails on wrong length or an off-curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(&key_array(bytes)?)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CURVE_KEY_LEN] {
        self.inner.as_bytes()
    }

    /// Verify a signature over `message`.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidSignature`] on mismatch.
    pub fn verify(&self, message: &[u8], signature: &EdSignature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Ed25519 signature.
pub struct EdSignature {
    inner: ed25519_dalek::Signature,
}

impl EdSignature {
    /// Parse from 64 raw bytes.
    ///
    /// # Errors
    /// Fails on wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::Signature::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self { inner })
    }

    /// Raw signature bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}
