//! Pair-setup: the PIN-backed SRP exchange plus long-term key exchange.
//!
//! Three round trips over `/pair-setup`, entered after `/pair-pin-start`
//! put a PIN on the receiver's screen. On success the long-term keys are
//! exported for persistence on the device record, and the session can
//! continue into pair-verify without user interaction next time.

use crate::crypto::{ChaChaCipher, EdKeyPair, EdPublicKey, EdSignature, HkdfSha512, Nonce};
use crate::crypto::{SrpClient, SrpVerifier};

use super::tlv::{TlvReader, TlvType, TlvWriter, methods};
use super::{PairStatus, PairingError, SRP_USERNAME, auth_key_export};

enum State {
    Start,
    AwaitChallenge(SrpClient),
    SendProof {
        public_key: Vec<u8>,
        verifier: SrpVerifier,
    },
    AwaitProof(SrpVerifier),
    SendIdentity {
        session_key: Vec<u8>,
    },
    AwaitIdentity {
        session_key: Vec<u8>,
        cipher: ChaChaCipher,
    },
    Complete {
        session_key: Vec<u8>,
        auth_key: String,
    },
    Failed,
}

/// Pair-setup handshake state.
pub struct PairSetup {
    state: State,
    pin: String,
    client_id: String,
    identity: EdKeyPair,
}

impl PairSetup {
    /// Fresh handshake for a user-entered PIN. `client_id` is our stable
    /// pairing identifier (the engine's device id string).
    #[must_use]
    pub fn new(pin: &str, client_id: &str) -> Self {
        Self {
            state: State::Start,
            pin: pin.to_string(),
            client_id: client_id.to_string(),
            identity: EdKeyPair::generate(),
        }
    }

    /// Next request body.
    ///
    /// # Errors
    /// Fails when called out of order.
    pub fn make_request(&mut self) -> Result<Vec<u8>, PairingError> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Start => {
                let srp = SrpClient::new()?;
                let m1 = TlvWriter::new()
                    .state(1)
                    .put_u8(TlvType::Method, methods::PAIR_SETUP)
                    .finish();
                self.state = State::AwaitChallenge(srp);
                Ok(m1)
            }
            State::SendProof {
                public_key,
                verifier,
            } => {
                let m3 = TlvWriter::new()
                    .state(3)
                    .put(TlvType::PublicKey, &public_key)
                    .put(TlvType::Proof, verifier.client_proof())
                    .finish();
                self.state = State::AwaitProof(verifier);
                Ok(m3)
            }
            State::SendIdentity { session_key } => {
                let m5 = self.identity_message(&session_key)?;
                let encrypt_key: [u8; 32] = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &session_key)
                    .expand(b"Pair-Setup-Encrypt-Info")?;
                self.state = State::AwaitIdentity {
                    session_key,
                    cipher: ChaChaCipher::new(&encrypt_key)?,
                };
                Ok(m5)
            }
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// Consume a response body.
    ///
    /// # Errors
    /// Propagates device error codes, state mismatches, proof and
    /// signature failures.
    pub fn read_response(&mut self, body: &[u8]) -> Result<PairStatus, PairingError> {
        let tlv = TlvReader::parse(body)?;
        if let Some(code) = tlv.error() {
            self.state = State::Failed;
            return Err(PairingError::DeviceError { code });
        }

        match std::mem::replace(&mut self.state, State::Failed) {
            State::AwaitChallenge(srp) => {
                tlv.expect_state(2)?;
                let salt = tlv.require(TlvType::Salt)?;
                let server_public = tlv.require(TlvType::PublicKey)?;

                let verifier = srp.process_challenge(
                    SRP_USERNAME,
                    self.pin.as_bytes(),
                    salt,
                    server_public,
                )?;
                self.state = State::SendProof {
                    public_key: srp.public_key().to_vec(),
                    verifier,
                };
                Ok(PairStatus::InProgress)
            }
            State::AwaitProof(verifier) => {
                tlv.expect_state(4)?;
                let server_proof = tlv.require(TlvType::Proof)?;
                let key = verifier.verify_server(server_proof)?;

                self.state = State::SendIdentity {
                    session_key: key.as_bytes().to_vec(),
                };
                Ok(PairStatus::InProgress)
            }
            State::AwaitIdentity {
                session_key,
                cipher,
            } => {
                tlv.expect_state(6)?;
                let sealed = tlv.require(TlvType::EncryptedData)?;
                let plain = cipher.open(&Nonce::from_label(b"PS-Msg06"), &[], sealed)?;

                let inner = TlvReader::parse(&plain)?;
                let device_id = inner.require(TlvType::Identifier)?;
                let device_ltpk_bytes = inner.require(TlvType::PublicKey)?;
                let signature = inner.require(TlvType::Signature)?;

                let device_ltpk = EdPublicKey::from_bytes(device_ltpk_bytes)?;
                let accessory_x: [u8; 32] =
                    HkdfSha512::new(Some(b"Pair-Setup-Accessory-Sign-Salt"), &session_key)
                        .expand(b"Pair-Setup-Accessory-Sign-Info")?;

                let mut signed = Vec::with_capacity(32 + device_id.len() + 32);
                signed.extend_from_slice(&accessory_x);
                signed.extend_from_slice(device_id);
                signed.extend_from_slice(device_ltpk_bytes);

                device_ltpk
                    .verify(&signed, &EdSignature::from_bytes(signature)?)
                    .map_err(|_| PairingError::SignatureRejected)?;

                let auth_key = auth_key_export(&self.identity.seed(), device_ltpk.as_bytes());
                self.state = State::Complete {
                    session_key,
                    auth_key,
                };
                Ok(PairStatus::Complete)
            }
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// Build the sealed M5 identity message.
    fn identity_message(&self, session_key: &[u8]) -> Result<Vec<u8>, PairingError> {
        let controller_x: [u8; 32] =
            HkdfSha512::new(Some(b"Pair-Setup-Controller-Sign-Salt"), session_key)
                .expand(b"Pair-Setup-Controller-Sign-Info")?;

        let ltpk = self.identity.public_key();
        let mut signed = Vec::with_capacity(32 + self.client_id.len() + 32);
        signed.extend_from_slice(&controller_x);
        signed.extend_from_slice(self.client_id.as_bytes());
        signed.extend_from_slice(ltpk.as_bytes());
        let signature = self.identity.sign(&signed);

        let inner = TlvWriter::new()
            .put(TlvType::Identifier, self.client_id.as_bytes())
            .put(TlvType::PublicKey, ltpk.as_bytes())
            .put(TlvType::Signature, &signature.to_bytes())
            .finish();

        let encrypt_key: [u8; 32] = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), session_key)
            .expand(b"Pair-Setup-Encrypt-Info")?;
        let cipher = ChaChaCipher::new(&encrypt_key)?;
        let sealed = cipher.seal(&Nonce::from_label(b"PS-Msg05"), &[], &inner)?;

        Ok(TlvWriter::new()
            .state(5)
            .put(TlvType::EncryptedData, &sealed)
            .finish())
    }

    /// The 64-byte SRP session key once complete.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        match &self.state {
            State::Complete { session_key, .. } => Some(session_key),
            _ => None,
        }
    }

    /// The exported auth key for persistence, once complete.
    #[must_use]
    pub fn auth_key(&self) -> Option<&str> {
        match &self.state {
            State::Complete { auth_key, .. } => Some(auth_key),
            _ => None,
        }
    }
}
