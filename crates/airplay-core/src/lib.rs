//! # airplay-core
//!
//! Core types and error definitions shared across the AirPlay 2 sender crates.
//!
//! This crate provides:
//! - Receiver records as handed over by discovery
//! - 64-bit feature flag and status flag parsing
//! - The error taxonomy used by every layer

pub mod device;
pub mod error;
pub mod features;

pub use device::{DeviceId, PairingRequirement, ReceiverInfo, Version};
pub use error::{
    AuthError, CryptoError, Error, ErrorKind, FormatError, ProtocolError, Result, TransportError,
};
pub use features::{Features, StatusFlags};
