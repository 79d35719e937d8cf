//! Curve25519 ECDH for Pair-Verify session key agreement.

use airplay_core::error::{AuthError, Result};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral Curve25519 key pair for ECDH.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Compute the shared secret with a peer's public key.
    ///
    /// An all-zero peer key is rejected up front; any other low-order point
    /// shows up as an all-zero shared secret and is rejected too.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> Result<[u8; 32]> {
        if peer_public.iter().all(|&b| b == 0) {
            return Err(AuthError::InvalidPublicKey("X25519 key is all zeros".to_string()).into());
        }

        let static_secret = StaticSecret::from(self.secret);
        let shared = static_secret.diffie_hellman(&PublicKey::from(*peer_public));

        if !shared.was_contributory() {
            return Err(AuthError::WeakSharedSecret.into());
        }
        Ok(shared.to_bytes())
    }
}
