//! Transient pairing: the SRP exchange with the well-known PIN `3939`.
//!
//! Two round trips over `/pair-setup`. Nothing is persisted; the 64-byte
//! SRP session key is the shared secret, of which the first 32 bytes key
//! the audio cipher.

use crate::crypto::{SrpClient, SrpVerifier};

use super::tlv::{TlvReader, TlvType, TlvWriter, flags, methods};
use super::{PairStatus, PairingError, SRP_USERNAME, TRANSIENT_PIN};

enum State {
    Start,
    AwaitChallenge(SrpClient),
    SendProof {
        public_key: Vec<u8>,
        verifier: SrpVerifier,
    },
    AwaitProof(SrpVerifier),
    Complete(Vec<u8>),
    Failed,
}

/// Transient pairing handshake state.
pub struct TransientPair {
    state: State,
}

impl TransientPair {
    /// Fresh handshake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Start,
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
                    .put_u8(TlvType::Flags, flags::TRANSIENT)
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
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// Consume a response body.
    ///
    /// # Errors
    /// Propagates device error codes, state mismatches and proof failures.
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

                let verifier =
                    srp.process_challenge(SRP_USERNAME, TRANSIENT_PIN, salt, server_public)?;
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

                self.state = State::Complete(key.as_bytes().to_vec());
                Ok(PairStatus::Complete)
            }
            _ => Err(PairingError::OutOfOrder),
        }
    }

    /// The 64-byte shared secret once complete.
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        match &self.state {
            State::Complete(secret) => Some(secret),
            _ => None,
        }
    }
}

impl Default for TransientPair {
    fn default() -> Self {
        Self::new()
    }
}
