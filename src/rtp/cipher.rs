use crate::crypto::{CHACHA_TAG_LEN, ChaChaCipher, Nonce};

use super::packet::RTP_HEADER_LEN;
use super::RtpError;

/// Audio key length. Transient pairing yields a 64-byte shared secret,
/// but only the first 32 bytes ever key this cipher.
pub const AUDIO_KEY_LEN: usize = 32;

/// Per-session audio packet cipher.
///
/// Every payload is sealed with ChaCha20-Poly1305: the nonce counts
/// packets, the header's timestamp and SSRC ride along as AAD so a
/// tampered header fails authentication on the receiver. The wire layout
/// is `ciphertext | tag | low 8 nonce bytes`.
pub struct PacketCipher {
    cipher: ChaChaCipher,
    counter: u64,
}

impl PacketCipher {
    /// Key the cipher with the first 32 bytes of a shared secret.
    ///
    /// # Errors
    /// Fails if `secret` is shorter than 32 bytes.
    pub fn new(secret: &[u8]) -> Result<Self, RtpError> {
        if secret.len() < AUDIO_KEY_LEN {
            return Err(RtpError::BadKeyLength(secret.len()));
        }
        let cipher =
            ChaChaCipher::new(&secret[..AUDIO_KEY_LEN]).map_err(|_| RtpError::CipherFailed)?;
        Ok(Self { cipher, counter: 0 })
    }

    /// Seal one packet: header stays clear, payload is encrypted and the
    /// tag plus nonce tail are appended.
    ///
    /// # Errors
    /// Fails on AEAD failure or a short header.
    pub fn seal_packet(
        &mut self,
        header: &[u8; RTP_HEADER_LEN],
        payload: &[u8],
    ) -> Result<Vec<u8>, RtpError> {
        let nonce = Nonce::from_counter(self.counter);
        let sealed = self
            .cipher
            .seal(&nonce, &header[4..RTP_HEADER_LEN], payload)
            .map_err(|_| RtpError::CipherFailed)?;

        let mut out = Vec::with_capacity(RTP_HEADER_LEN + sealed.len() + 8);
        out.extend_from_slice(header);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;
        Ok(out)
    }

    /// Open a sealed packet again (receiver side; used by tests).
    ///
    /// # Errors
    /// Fails on truncation or authentication failure.
    pub fn open_packet(&self, packet: &[u8]) -> Result<Vec<u8>, RtpError> {
        if packet.len() < RTP_HEADER_LEN + CHACHA_TAG_LEN + 8 {
            return Err(RtpError::Truncated);
        }
        let (body, nonce_tail) = packet.split_at(packet.len() - 8);
        let counter = u64::from_le_bytes(nonce_tail.try_into().map_err(|_| RtpError::Truncated)?);
        let nonce = Nonce::from_counter(counter);

        self.cipher
            .open(&nonce, &body[4..RTP_HEADER_LEN], &body[RTP_HEADER_LEN..])
            .map_err(|_| RtpError::CipherFailed)
    }

    /// Packets sealed so far.
    #[must_use]
    pub fn packets_sealed(&self) -> u64 {
        self.counter
    }
}
