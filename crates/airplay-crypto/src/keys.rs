//! Session key types and derivation.

use crate::chacha::ControlCipher;
use crate::hkdf;
use airplay_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

/// 32-byte symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

/// Directional keys for the post-pairing channel.
#[derive(Debug, Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Protects what we send.
    pub write_key: EncryptionKey,
    /// Protects what the receiver sends.
    pub read_key: EncryptionKey,
}

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Pair-Setup M5/M6 key from the SRP session key.
    pub fn pair_setup(srp_secret: &SharedSecret) -> Result<Self, CryptoError> {
        hkdf::derive_pair_setup_key(srp_secret.as_bytes()).map(Self)
    }

    /// Pair-Verify M2/M3 key from the X25519 shared secret.
    pub fn pair_verify(ecdh_secret: &SharedSecret) -> Result<Self, CryptoError> {
        hkdf::derive_pair_verify_key(ecdh_secret.as_bytes()).map(Self)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl SessionKeys {
    /// Derive the sender's write/read keys from the Pair-Verify shared secret.
    pub fn derive_control_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let write_key = hkdf::derive_control_write_key(shared_secret.as_bytes())?;
        let read_key = hkdf::derive_control_read_key(shared_secret.as_bytes())?;

        Ok(Self {
            write_key: EncryptionKey(write_key),
            read_key: EncryptionKey(read_key),
        })
    }

    /// The same keys seen from the receiver's side.
    pub fn swapped(&self) -> Self {
        Self {
            write_key: self.read_key.clone(),
            read_key: self.write_key.clone(),
        }
    }

    /// Build a fresh cipher with both counters at zero.
    pub fn cipher(&self) -> ControlCipher {
        ControlCipher::new(*self.write_key.as_bytes(), *self.read_key.as_bytes())
    }
}
