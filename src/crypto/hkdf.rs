use hkdf::Hkdf;
use sha2::Sha512;

use super::CryptoError;

/// HKDF-SHA512, the derivation everything pairing-related uses.
pub struct HkdfSha512 {
    hkdf: Hkdf<Sha512>,
}

impl HkdfSha512 {
    /// Extract from input key material with an optional salt.
    #[must_use]
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            hkdf: Hkdf::<Sha512>::new(salt, ikm),
        }
    }

    /// Expand into a fixed-size key.
    ///
    /// # Errors
    /// Fails if `N` exceeds the HKDF output limit.
    pub fn expand<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(okm)
    }
}
