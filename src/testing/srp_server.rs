//! Server half of SRP-6a, just enough to prove the client side against.

use num_bigint::BigUint;
use sha2::{Digest, Sha512};

use crate::crypto::SRP_GROUP_LEN;

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

fn pad(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; SRP_GROUP_LEN];
    out[SRP_GROUP_LEN - bytes.len()..].copy_from_slice(bytes);
    out
}

/// One SRP verifier-side exchange.
pub struct SrpServer {
    n: BigUint,
    g: BigUint,
    b: BigUint,
    b_pub: BigUint,
    v: BigUint,
    /// The salt the server advertises
    pub salt: Vec<u8>,
    username: Vec<u8>,
}

impl SrpServer {
    pub fn new(username: &[u8], password: &[u8]) -> Self {
        // Same group and padding conventions as the client.
        let n = BigUint::parse_bytes(GROUP_N_HEX, 16).unwrap();
        let g = BigUint::from(5u32);

        let salt = vec![0x42u8; 16];
        let x = {
            let mut inner = Sha512::new();
            inner.update(username);
            inner.update(b":");
            inner.update(password);
            let identity = inner.finalize();
            let mut outer = Sha512::new();
            outer.update(&salt);
            outer.update(identity);
            BigUint::from_bytes_be(&outer.finalize())
        };
        let v = g.modpow(&x, &n);

        let k = {
            let mut hasher = Sha512::new();
            hasher.update(n.to_bytes_be());
            hasher.update(pad(&g.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        let b = BigUint::from_bytes_be(&[0x77u8; 32]);
        let b_pub = (&k * &v + g.modpow(&b, &n)) % &n;

        Self {
            n,
            g: g.clone(),
            b,
            b_pub,
            v,
            salt,
            username: username.to_vec(),
        }
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.b_pub.to_bytes_be()
    }

    /// Answer the client's public value. Returns
    /// `(expected client proof M1, server proof M2, session key K)`.
    pub fn answer(&self, client_public: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let a_pub = BigUint::from_bytes_be(client_public);

        let u = {
            let mut hasher = Sha512::new();
            hasher.update(pad(client_public));
            hasher.update(pad(&self.b_pub.to_bytes_be()));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        let s = (&a_pub * self.v.modpow(&u, &self.n)).modpow(&self.b, &self.n);
        let key = Sha512::digest(s.to_bytes_be()).to_vec();

        let m1 = {
            let hn = Sha512::digest(self.n.to_bytes_be());
            let hg = Sha512::digest(self.g.to_bytes_be());
            let mut xor = [0u8; 64];
            for (out, (a, b)) in xor.iter_mut().zip(hn.iter().zip(hg.iter())) {
                *out = a ^ b;
            }
            let mut hasher = Sha512::new();
            hasher.update(xor);
            hasher.update(Sha512::digest(&self.username));
            hasher.update(&self.salt);
            hasher.update(pad(client_public));
            hasher.update(self.b_pub.to_bytes_be());
            hasher.update(&key);
            hasher.finalize().to_vec()
        };

        let m2 = {
            let mut hasher = Sha512::new();
            hasher.update(a_pub.to_bytes_be());
            hasher.update(&m1);
            hasher.update(&key);
            hasher.finalize().to_vec()
        };

        (m1, m2, key)
    }
}
