//! SRP-6a for HomeKit Pair-Setup.
//!
//! Uses the 3072-bit prime from RFC 5054, generator g=5 and SHA-512.
//! [`SrpClient`] is the controller side. [`SrpServer`] is the verifier side,
//! used to simulate receivers in tests.

use airplay_core::error::{AuthError, CryptoError, Result};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username used for every AirPlay Pair-Setup.
pub const PAIR_SETUP_IDENTITY: &[u8] = b"Pair-Setup";

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a group parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpParams {
    pub n: BigUint,
    pub g: BigUint,
}

impl SrpParams {
    /// The RFC 5054 3072-bit group with g=5.
    pub fn rfc5054_3072() -> std::result::Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16).ok_or_else(|| {
            CryptoError::KeyDerivation("invalid RFC 5054 prime constant".to_string())
        })?;
        Ok(Self {
            n,
            g: BigUint::from(5u32),
        })
    }
}

/// Client-side SRP state.
#[derive(ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge (Pair-Setup M2).
#[derive(Debug, Clone)]
pub struct SrpChallenge {
    pub salt: [u8; 16],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpProof {
    /// M1, sent in Pair-Setup M3.
    pub client_proof: Vec<u8>,
    /// K = H(PAD(S)), input to every later HKDF.
    pub shared_secret: Vec<u8>,
    /// M2 the receiver must return in Pair-Setup M4.
    pub expected_server_proof: Vec<u8>,
}

impl SrpProof {
    /// Check the receiver's M2 in constant time.
    ///
    /// A mismatch means the receiver derived a different session key,
    /// which in practice means the PIN was wrong.
    pub fn verify_server_proof(&self, server_proof: &[u8]) -> std::result::Result<(), AuthError> {
        if bool::from(server_proof.ct_eq(&self.expected_server_proof)) {
            Ok(())
        } else {
            Err(AuthError::IncorrectSetupCode)
        }
    }
}

impl SrpClient {
    /// Create a client for `identity` and `password` (the PIN).
    ///
    /// A fresh 256-bit private value is drawn from the OS RNG.
    pub fn new(identity: &[u8], password: &[u8]) -> std::result::Result<Self, CryptoError> {
        let a = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, &a.to_bytes_be())
    }

    /// Create a client with a fixed private value.
    pub fn with_private_key(
        identity: &[u8],
        password: &[u8],
        private_key: &[u8],
    ) -> std::result::Result<Self, CryptoError> {
        let params = SrpParams::rfc5054_3072()?;
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Ok(Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        })
    }

    /// Client public key A, left-padded to 384 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process the receiver's salt and B and derive M1, K and the expected M2.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof> {
        let params = &self.params;
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if (&b % &params.n) == BigUint::ZERO {
            return Err(AuthError::InvalidPublicKey("SRP B mod N is zero".to_string()).into());
        }

        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(AuthError::InvalidPublicKey("SRP u is zero".to_string()).into());
        }

        let a = BigUint::from_bytes_be(&self.private_key);
        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let k_gx = (&k * params.g.modpow(&x, &params.n)) % &params.n;
        let base = ((&b % &params.n) + &params.n - &k_gx) % &params.n;
        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &params.n);

        let shared_secret = hash_padded(&s);
        let client_proof = compute_m1(
            params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }
}

/// Verifier-side SRP state: the receiver's half of Pair-Setup M2/M4.
#[derive(ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    salt: [u8; 16],
    #[zeroize(skip)]
    verifier: BigUint,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Keys the verifier holds once the client's M1 checked out.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpServerSession {
    pub shared_secret: Vec<u8>,
    pub server_proof: Vec<u8>,
}

impl SrpServer {
    /// Create a verifier for `identity`/`password` with a random salt.
    pub fn new(identity: &[u8], password: &[u8]) -> std::result::Result<Self, CryptoError> {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(identity, password, salt)
    }

    /// Create a verifier with a fixed salt.
    pub fn with_salt(
        identity: &[u8],
        password: &[u8],
        salt: [u8; 16],
    ) -> std::result::Result<Self, CryptoError> {
        let params = SrpParams::rfc5054_3072()?;
        let x = compute_x(&salt, identity, password);
        let verifier = params.g.modpow(&x, &params.n);

        // B = (k*v + g^b) mod N
        let b = OsRng.gen_biguint(256);
        let k = compute_k(&params);
        let public_key = ((&k * &verifier) + params.g.modpow(&b, &params.n)) % &params.n;

        Ok(Self {
            params,
            identity: identity.to_vec(),
            salt,
            verifier,
            private_key: b.to_bytes_be(),
            public_key,
        })
    }

    /// Salt and padded B for Pair-Setup M2.
    pub fn challenge(&self) -> SrpChallenge {
        SrpChallenge {
            salt: self.salt,
            server_public_key: pad_to_n(&self.public_key),
        }
    }

    /// Check the client's A and M1; on success return K and M2.
    ///
    /// A proof mismatch is [`AuthError::IncorrectSetupCode`].
    pub fn verify_client(&self, client_public: &[u8], client_proof: &[u8]) -> Result<SrpServerSession> {
        let params = &self.params;
        let a = BigUint::from_bytes_be(client_public);
        if (&a % &params.n) == BigUint::ZERO {
            return Err(AuthError::InvalidPublicKey("SRP A mod N is zero".to_string()).into());
        }

        let u = compute_u(&a, &self.public_key);
        if u == BigUint::ZERO {
            return Err(AuthError::InvalidPublicKey("SRP u is zero".to_string()).into());
        }

        // S = (A * v^u)^b mod N
        let b = BigUint::from_bytes_be(&self.private_key);
        let base = (&a * self.verifier.modpow(&u, &params.n)) % &params.n;
        let s = base.modpow(&b, &params.n);
        let shared_secret = hash_padded(&s);

        let expected = compute_m1(
            params,
            &self.identity,
            &self.salt,
            &a,
            &self.public_key,
            &shared_secret,
        );
        if !bool::from(client_proof.ct_eq(&expected)) {
            return Err(AuthError::IncorrectSetupCode.into());
        }

        let server_proof = compute_m2(&a, client_proof, &shared_secret);
        Ok(SrpServerSession {
            shared_secret,
            server_proof,
        })
    }
}

/// M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
///
/// H(g) is taken over the unpadded generator byte, unlike k.
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    Sha512::new()
        .chain_update(xor_result)
        .chain_update(Sha512::digest(identity))
        .chain_update(salt)
        .chain_update(pad_to_n(a))
        .chain_update(pad_to_n(b))
        .chain_update(k)
        .finalize()
        .to_vec()
}

/// M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, m1: &[u8], k: &[u8]) -> Vec<u8> {
    Sha512::new()
        .chain_update(pad_to_n(a))
        .chain_update(m1)
        .chain_update(k)
        .finalize()
        .to_vec()
}

/// K = H(PAD(S))
fn hash_padded(s: &BigUint) -> Vec<u8> {
    Sha512::digest(pad_to_n(s)).to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// k = H(N || PAD(g))
fn compute_k(params: &SrpParams) -> BigUint {
    let hash = Sha512::new()
        .chain_update(pad_to_n(&params.n))
        .chain_update(pad_to_n(&params.g))
        .finalize();
    BigUint::from_bytes_be(&hash)
}

/// u = H(PAD(A) || PAD(B))
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let hash = Sha512::new()
        .chain_update(pad_to_n(a))
        .chain_update(pad_to_n(b))
        .finalize();
    BigUint::from_bytes_be(&hash)
}

/// x = H(salt || H(I || ":" || P))
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let inner = Sha512::new()
        .chain_update(identity)
        .chain_update(b":")
        .chain_update(password)
        .finalize();
    let hash = Sha512::new().chain_update(salt).chain_update(inner).finalize();
    BigUint::from_bytes_be(&hash)
}
