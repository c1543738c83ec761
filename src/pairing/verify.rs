//! Pair-verify: session establishment from persisted keys.
//!
//! Two round trips over `/pair-verify`. An ephemeral X25519 exchange is
//! authenticated on both sides with the Ed25519 long-term keys saved by a
//! previous pair-setup; a receiver that lost its pairings rejects step 1,
//! which is how a stale stored key is detected.

use crate::crypto::{
    ChaChaCipher, EdKeyPair, EdPublicKey, EdSignature, HkdfSha512, Nonce, X25519KeyPair,
    X25519PublicKey,
};

use super::tlv::{TlvReader, TlvType, TlvWriter};
use super::{PairStatus, PairingError, auth_key_import};

enum State {
    Start,
    AwaitAccessory,
    SendProof {
        message: Vec<u8>,
        shared_secret: [u8; 32],
    },
    AwaitFinish {
        shared_secret: [u8; 32],
    },
    Complete {
        shared_secret: [u8; 32],
    },
    Failed,
}

/// Pair-verify handshake state.
pub struct PairVerify {
    state: State,
    identity: EdKeyPair,
    device_ltpk: EdPublicKey,
    ephemeral: X25519KeyPair,
    client_id: String,
}

impl PairVerify {
    /// Build from a persisted auth key (see
    /// [`auth_key_export`](super::auth_key_export)).
    ///
    /// # Errors
    /// Fails if the stored key does not parse.
    pub fn new(auth_key: &str, client_id: &str) -> Result<Self, PairingError> {
        let (seed, ltpk) = auth_key_import(auth_key)?;
        Ok(Self {
            state: State::Start,
            identity: EdKeyPair::from_seed(&seed)?,
            device_ltpk: EdPublicKey::from_bytes(&ltpk)?,
            ephemeral: X25519KeyPair::generate(),
            client_id: client_id.to_string(),
        })
    }

    /// Next request body.
    ///
    /// # Errors
    /// Fails when called out of order.
    pub fn make_request(&mut self) -> Result<Vec<u8>, PairingError> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Start => {
                let m1 = TlvWriter::new()
                    .state(1)
                    .put(TlvType::PublicKey, self.ephemeral.public_key().as_bytes())
                    .finish();
                self.state = State::AwaitAccessory;
                Ok(m1)
            }
            State::SendProof {
                message,
                shared_secret,
            } => {
                self.state = State::AwaitFinish { shared_secret };
                Ok(message)
            }
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// Consume a response body.
    ///
    /// # Errors
    /// Propagates device error codes, state mismatches and signature
    /// failures. A failure on the first response usually means the
    /// receiver dropped our pairing.
    pub fn read_response(&mut self, body: &[u8]) -> Result<PairStatus, PairingError> {
        let tlv = TlvReader::parse(body)?;
        if let Some(code) = tlv.error() {
            self.state = State::Failed;
            return Err(PairingError::DeviceError { code });
        }

        match std::mem::replace(&mut self.state, State::Failed) {
            State::AwaitAccessory => {
                tlv.expect_state(2)?;
                let device_ephemeral_bytes = tlv.require(TlvType::PublicKey)?;
                let sealed = tlv.require(TlvType::EncryptedData)?;

                let device_ephemeral = X25519PublicKey::from_bytes(device_ephemeral_bytes)?;
                let shared = self.ephemeral.diffie_hellman(&device_ephemeral);
                let shared_secret = *shared.as_bytes();

                let session_key: [u8; 32] =
                    HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), &shared_secret)
                        .expand(b"Pair-Verify-Encrypt-Info")?;
                let cipher = ChaChaCipher::new(&session_key)?;

                // The receiver proves it still holds the long-term key we
                // stored: signature over its ephemeral key then ours.
                let plain = cipher.open(&Nonce::from_label(b"PV-Msg02"), &[], sealed)?;
                let inner = TlvReader::parse(&plain)?;
                let signature = inner.require(TlvType::Signature)?;

                let mut signed = Vec::with_capacity(64);
                signed.extend_from_slice(device_ephemeral_bytes);
                signed.extend_from_slice(self.ephemeral.public_key().as_bytes());
                self.device_ltpk
                    .verify(&signed, &EdSignature::from_bytes(signature)?)
                    .map_err(|_| PairingError::SignatureRejected)?;

                // Our turn: signature over our ephemeral key then theirs.
                let mut our_signed = Vec::with_capacity(64);
                our_signed.extend_from_slice(self.ephemeral.public_key().as_bytes());
                our_signed.extend_from_slice(device_ephemeral_bytes);
                let our_signature = self.identity.sign(&our_signed);

                let reply = TlvWriter::new()
                    .put(TlvType::Identifier, self.client_id.as_bytes())
                    .put(TlvType::Signature, &our_signature.to_bytes())
                    .finish();
                let sealed_reply = cipher.seal(&Nonce::from_label(b"PV-Msg03"), &[], &reply)?;

                let message = TlvWriter::new()
                    .state(3)
                    .put(TlvType::EncryptedData, &sealed_reply)
                    .finish();

                self.state = State::SendProof {
                    message,
                    shared_secret,
                };
                Ok(PairStatus::InProgress)
            }
            State::AwaitFinish { shared_secret } => {
                tlv.expect_state(4)?;
                self.state = State::Complete { shared_secret };
                Ok(PairStatus::Complete)
            }
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// The 32-byte X25519 shared secret once complete.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        match &self.state {
            State::Complete { shared_secret } => Some(shared_secret),
            _ => None,
        }
    }
}
