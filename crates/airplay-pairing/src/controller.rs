//! Controller identity for consistent pairing identifiers.
//!
//! The same identifier and Ed25519 key must be presented in Pair-Setup M5
//! and in every later Pair-Verify M3, or the receiver will not recognise us.

use airplay_crypto::ed25519::IdentityKeyPair;

/// Our long-term pairing identity (identifier plus LTSK/LTPK).
#[derive(Clone)]
pub struct ControllerIdentity {
    /// Stable identifier, e.g. "6F1C2D4E-0A6B-4C8D-9E2F-3A4B5C6D7E8F".
    id: String,
    keypair: IdentityKeyPair,
}

impl ControllerIdentity {
    /// Fresh key pair with a random uppercase UUID identifier.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().to_string().to_uppercase();
        Self::with_id(IdentityKeyPair::generate(), id)
    }

    /// Rebuild a persisted identity.
    pub fn from_seed(id: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self::with_id(IdentityKeyPair::from_seed(seed), id)
    }

    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier as sent under the `Identifier` tag.
    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    /// Ed25519 public key (LTPK).
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// Seed for persistence.
    pub fn seed(&self) -> [u8; 32] {
        self.keypair.seed()
    }
}

impl std::fmt::Debug for ControllerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerIdentity")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_creates_uuid_identifier() {
        let identity = ControllerIdentity::generate();

        // 8-4-4-4-12
        assert_eq!(identity.id().len(), 36);
        assert_eq!(identity.id().matches('-').count(), 4);
        assert_eq!(identity.id(), identity.id().to_uppercase());
    }

    #[test]
    fn two_identities_differ() {
        let a = ControllerIdentity::generate();
        let b = ControllerIdentity::generate();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn from_seed_restores_same_key() {
        let original = ControllerIdentity::generate();
        let restored = ControllerIdentity::from_seed(original.id(), &original.seed());

        assert_eq!(original.id(), restored.id());
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn with_id_uses_custom_identifier() {
        let identity = ControllerIdentity::with_id(IdentityKeyPair::generate(), "Custom-Controller-ID");
        assert_eq!(identity.id(), "Custom-Controller-ID");
        assert_eq!(identity.id_bytes(), b"Custom-Controller-ID");
    }

    #[test]
    fn sign_produces_verifiable_signature() {
        let identity = ControllerIdentity::generate();
        let signature = identity.sign(b"test message");
        airplay_crypto::ed25519::verify(&identity.public_key(), b"test message", &signature).unwrap();
    }

    #[test]
    fn debug_omits_key_material() {
        let identity = ControllerIdentity::from_seed("ID", &[7u8; 32]);
        let debug = format!("{:?}", identity);
        assert!(debug.contains("\"ID\""));
        assert!(!debug.contains("keypair"));
    }
}
