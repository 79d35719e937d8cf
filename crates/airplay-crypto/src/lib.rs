//! # airplay-crypto
//!
//! Cryptographic building blocks for AirPlay sender pairing.
//!
//! This crate provides:
//! - TLV8 message codec
//! - SRP-6a (3072-bit, SHA-512) for Pair-Setup
//! - X25519 key agreement and Ed25519 signatures
//! - ChaCha20-Poly1305 with truncated tags and a stack-only short path
//! - HKDF-SHA512 key derivation
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::{ControlCipher, Direction};
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use tlv::{PairingErrorCode, PairingMethod, PairingState, Tlv8, TlvItem, TlvType};
