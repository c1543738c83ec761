use num_bigint::{BigUint, RandomBits};
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use super::{CryptoError, SRP_GROUP_LEN};

// RFC 5054 3072-bit group, the one HomeKit pair-setup mandates.
const GROUP_N_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
    8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
    302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
    A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
    49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
    FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
    180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
    3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
    04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
    B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
    1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
    BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
    E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

fn pad_to_group(bytes: &[u8]) -> Vec<u8> {
    let mut padded = vec![0u8; SRP_GROUP_LEN];
    padded[SRP_GROUP_LEN - bytes.len()..].copy_from_slice(bytes);
    padded
}

/// SRP-6a client half (SHA-512, 3072-bit group, g = 5).
///
/// Pair-setup and transient pairing both run this exchange; they only
/// differ in the password (the receiver PIN vs the fixed `3939`).
pub struct SrpClient {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    a: BigUint,
    public_key: Vec<u8>,
}

impl SrpClient {
    /// Build a client with a fresh random private exponent.
    ///
    /// # Errors
    /// Fails only if the compiled-in group constant is corrupt.
    pub fn new() -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(GROUP_N_HEX, 16)
            .ok_or(CryptoError::Srp("could not parse group modulus"))?;
        let g = BigUint::from(5u32);

        // k = H(N | pad(g))
        let k = {
            let mut hasher = Sha512::new();
            hasher.update(n.to_bytes_be());
            hasher.update(pad_to_group(&g.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        let mut rng = rand::thread_rng();
        let a: BigUint = rng.sample(RandomBits::new(256));
        let a = a % &n;

        let a_pub = g.modpow(&a, &n);
        let public_key = pad_to_group(&a_pub.to_bytes_be());

        Ok(Self {
            n,
            g,
            k,
            a,
            public_key,
        })
    }

    /// Our public value A, padded to the group size.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Run the challenge half of the exchange from the server's salt and
    /// public value B, producing the proof to send and the verifier for
    /// the server's answer.
    ///
    /// # Errors
    /// Fails if B is invalid (B mod N == 0 is the classic poisoned value).
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % &self.n).is_zero() {
            return Err(CryptoError::Srp("server public key is zero mod N"));
        }

        let a_pub = BigUint::from_bytes_be(&self.public_key);

        // u = H(pad(A) | pad(B))
        let u = {
            let mut hasher = Sha512::new();
            hasher.update(&self.public_key);
            hasher.update(pad_to_group(&b_pub.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };
        if u.is_zero() {
            return Err(CryptoError::Srp("scrambling parameter is zero"));
        }

        // x = H(salt | H(username ":" password))
        let x = {
            let mut inner = Sha512::new();
            inner.update(username);
            inner.update(b":");
            inner.update(password);
            let identity_hash = inner.finalize();

            let mut outer = Sha512::new();
            outer.update(salt);
            outer.update(identity_hash);
            BigUint::from_bytes_be(&outer.finalize())
        };

        // S = (B - k * g^x) ^ (a + u * x) mod N, kept non-negative by
        // adding N before the subtraction.
        let g_x = self.g.modpow(&x, &self.n);
        let k_g_x = (&self.k * g_x) % &self.n;
        let base = ((&b_pub + &self.n) - &k_g_x) % &self.n;
        let exp = &self.a + (&u * x);
        let s_shared = base.modpow(&exp, &self.n);

        // K = H(S), 64 bytes with SHA-512
        let session_key = Sha512::digest(s_shared.to_bytes_be()).to_vec();

        // M1 = H(H(N) xor H(g) | H(username) | salt | A | B | K)
        let proof = {
            let hn = Sha512::digest(self.n.to_bytes_be());
            let hg = Sha512::digest(self.g.to_bytes_be());
            let mut hn_xor_hg = [0u8; 64];
            for (out, (a, b)) in hn_xor_hg.iter_mut().zip(hn.iter().zip(hg.iter())) {
                *out = a ^ b;
            }

            let mut hasher = Sha512::new();
            hasher.update(hn_xor_hg);
            hasher.update(Sha512::digest(username));
            hasher.update(salt);
            hasher.update(&self.public_key);
            hasher.update(b_pub.to_bytes_be());
            hasher.update(&session_key);
            hasher.finalize().to_vec()
        };

        Ok(SrpVerifier {
            a_pub,
            proof,
            session_key,
        })
    }
}

/// Holds the client proof and verifies the server's.
pub struct SrpVerifier {
    a_pub: BigUint,
    proof: Vec<u8>,
    session_key: Vec<u8>,
}

impl SrpVerifier {
    /// Client proof M1 to send with our public value.
    #[must_use]
    pub fn client_proof(&self) -> &[u8] {
        &self.proof
    }

    /// Check the server proof M2 and release the session key.
    ///
    /// # Errors
    /// Fails if the proof does not match (wrong PIN, corrupt exchange).
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<SrpSessionKey, CryptoError> {
        // M2 = H(A | M1 | K)
        let mut hasher = Sha512::new();
        hasher.update(self.a_pub.to_bytes_be());
        hasher.update(&self.proof);
        hasher.update(&self.session_key);
        let expected = hasher.finalize();

        if expected.as_slice() != server_proof {
            return Err(CryptoError::Srp("server proof mismatch"));
        }

        Ok(SrpSessionKey {
            key: self.session_key.clone(),
        })
    }
}

/// The 64-byte SRP session key K; zeroed on drop.
pub struct SrpSessionKey {
    key: Vec<u8>,
}

impl SrpSessionKey {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SrpSessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
