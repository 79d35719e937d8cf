//! Ed25519 signatures for long-term controller and receiver identities.

use airplay_core::error::{AuthError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

/// Long-term Ed25519 identity key pair.
///
/// Clone is allowed so one identity can serve both Pair-Setup and
/// Pair-Verify; every copy zeroizes on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    seed: [u8; 32],
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            seed: signing_key.to_bytes(),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            seed: *seed,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Sign a message, returning a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.seed).sign(message).to_bytes()
    }

    /// Export the seed for storage.
    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }
}

/// Verify an Ed25519 signature.
///
/// A key that does not decode to a curve point is
/// [`AuthError::InvalidPublicKey`]; any other failure is
/// [`AuthError::SignatureInvalid`].
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| AuthError::InvalidPublicKey(format!("Ed25519: {}", e)))?;

    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .map_err(|_| AuthError::SignatureInvalid.into())
}

/// Verify a signature given as an arbitrary slice, as received in a TLV.
pub fn verify_slice(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let signature: &[u8; 64] = signature
        .try_into()
        .map_err(|_| AuthError::SignatureInvalid)?;
    verify(public_key, message, signature)
}
