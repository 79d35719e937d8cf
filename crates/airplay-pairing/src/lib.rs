//! # airplay-pairing
//!
//! HomeKit pairing for an AirPlay sender.
//!
//! This crate implements:
//! - Pair-Setup M1-M6 (SRP-6a with the receiver's PIN, then identity exchange)
//! - Pair-Verify M1-M4 (X25519 plus Ed25519 signatures)
//! - The encrypted control channel keyed by Pair-Verify
//! - Persistent controller identity and paired receivers

mod channel;
mod controller;
mod message;
mod pair_setup;
mod pair_verify;
mod session;
mod store;
mod traits;

pub use channel::{parse_frame_length, EncryptedChannel, COUNTER_LEN};
pub use controller::ControllerIdentity;
pub use pair_setup::{PairSetup, PairSetupState};
pub use pair_verify::{PairVerify, PairVerifyState};
pub use session::{PairingDriver, PairingOutcome, DEFAULT_PIN_ATTEMPTS, DEFAULT_RESPONSE_TIMEOUT};
pub use store::{PairedReceiver, PairingStore};
pub use traits::{Exchange, PairingObserver, PinProvider, StaticPin, Transport};
