//! HomeKit Pair-Verify (M1-M4).
//!
//! Each session runs an ephemeral X25519 exchange, and both sides sign it
//! with the long-term keys swapped during Pair-Setup. The shared secret
//! then yields the control channel keys.

use airplay_core::error::{AuthError, ProtocolError, Result};
use airplay_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    curve25519::EcdhKeyPair,
    ed25519,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    tlv::{PairingState, Tlv8, TlvType},
};
use tracing::debug;

use crate::controller::ControllerIdentity;
use crate::message::{concat3, parse_response, require, require_array};
use crate::store::PairedReceiver;

const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerifyState {
    Initial,
    M1Sent,
    M2Received,
    M3Sent,
    Complete,
    Failed,
}

/// Pair-Verify state machine for one session.
pub struct PairVerify {
    state: PairVerifyState,
    controller: ControllerIdentity,
    receiver: PairedReceiver,
    ecdh: Option<EcdhKeyPair>,
    peer_public: Option<[u8; 32]>,
    shared_secret: Option<SharedSecret>,
    session_key: Option<EncryptionKey>,
}

impl PairVerify {
    /// `receiver` is the identity learned when we paired with it.
    pub fn new(controller: ControllerIdentity, receiver: PairedReceiver) -> Self {
        Self {
            state: PairVerifyState::Initial,
            controller,
            receiver,
            ecdh: None,
            peer_public: None,
            shared_secret: None,
            session_key: None,
        }
    }

    /// M1: `{State=1, PublicKey(ephemeral)}`.
    pub fn generate_m1(&mut self) -> Result<Vec<u8>> {
        let result = self.expect_state(PairVerifyState::Initial, "M1").map(|_| {
            let ecdh = EcdhKeyPair::generate();
            let m1 = Tlv8::pair_verify_m1(&ecdh.public_key()).encode();
            self.ecdh = Some(ecdh);
            debug!("Pair-Verify: sending M1");
            m1
        });
        self.advance(result, PairVerifyState::M1Sent)
    }

    /// M2: `{State=2, PublicKey(peer ephemeral), EncryptedData}`.
    ///
    /// Authenticates the receiver against its stored long-term key.
    pub fn process_m2(&mut self, response: &[u8]) -> Result<()> {
        let result = self.try_process_m2(response);
        self.advance(result, PairVerifyState::M2Received)
    }

    fn try_process_m2(&mut self, response: &[u8]) -> Result<()> {
        self.expect_state(PairVerifyState::M1Sent, "M2")?;
        let tlv = parse_response(response, PairingState::M2)?;

        let peer_public = require_array::<32>(&tlv, TlvType::PublicKey)?;
        let encrypted = require(&tlv, TlvType::EncryptedData)?;

        let ecdh = self
            .ecdh
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("ephemeral key missing".to_string()))?;
        let our_public = ecdh.public_key();
        let shared = SharedSecret::new(ecdh.diffie_hellman(&peer_public)?.to_vec());
        let session_key = EncryptionKey::pair_verify(&shared)?;

        let decrypted = decrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PV_MSG02_NONCE),
            encrypted,
        )?;
        let inner = Tlv8::parse(&decrypted)?;
        let identifier = require(&inner, TlvType::Identifier)?;
        let signature = require(&inner, TlvType::Signature)?;

        if identifier != self.receiver.identifier.as_bytes() {
            return Err(AuthError::UnknownReceiver.into());
        }

        let message = concat3(&peer_public, identifier, &our_public);
        ed25519::verify_slice(&self.receiver.ltpk, &message, signature)?;

        debug!("Pair-Verify: M2 verified for {}", self.receiver.identifier);
        self.peer_public = Some(peer_public);
        self.shared_secret = Some(shared);
        self.session_key = Some(session_key);
        Ok(())
    }

    /// M3: `{State=3, EncryptedData}` carrying our identifier and signature.
    pub fn generate_m3(&mut self) -> Result<Vec<u8>> {
        let result = self.try_generate_m3();
        self.advance(result, PairVerifyState::M3Sent)
    }

    fn try_generate_m3(&mut self) -> Result<Vec<u8>> {
        self.expect_state(PairVerifyState::M2Received, "M3")?;
        let (ecdh, peer_public, session_key) = match (&self.ecdh, &self.peer_public, &self.session_key) {
            (Some(ecdh), Some(peer), Some(key)) => (ecdh, peer, key),
            _ => return Err(ProtocolError::InvalidState("M2 state missing".to_string()).into()),
        };

        let message = concat3(&ecdh.public_key(), self.controller.id_bytes(), peer_public);
        let signature = self.controller.sign(&message);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.controller.id_bytes())
            .with(TlvType::Signature, signature.to_vec());
        let encrypted = encrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PV_MSG03_NONCE),
            &inner.encode(),
        )?;

        // the ephemeral secret is no longer needed once M3 is signed
        self.ecdh = None;
        debug!("Pair-Verify: sending M3");
        Ok(Tlv8::new()
            .with(TlvType::State, [PairingState::M3 as u8])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// M4: `{State=4}`. Returns the control channel keys.
    pub fn process_m4(&mut self, response: &[u8]) -> Result<SessionKeys> {
        let result = self.try_process_m4(response);
        let keys = self.advance(result, PairVerifyState::Complete)?;
        self.shared_secret = None;
        self.session_key = None;
        self.peer_public = None;
        Ok(keys)
    }

    fn try_process_m4(&mut self, response: &[u8]) -> Result<SessionKeys> {
        self.expect_state(PairVerifyState::M3Sent, "M4")?;
        parse_response(response, PairingState::M4)?;

        let shared = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("shared secret missing".to_string()))?;
        let keys = SessionKeys::derive_control_keys(shared)?;
        debug!("Pair-Verify: complete, control keys derived");
        Ok(keys)
    }

    pub fn state(&self) -> PairVerifyState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == PairVerifyState::Complete
    }

    pub fn receiver(&self) -> &PairedReceiver {
        &self.receiver
    }

    fn expect_state(&self, expected: PairVerifyState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState(format!(
                "{} not allowed in state {:?}",
                step, self.state
            ))
            .into())
        }
    }

    fn advance<T>(&mut self, result: Result<T>, next: PairVerifyState) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                debug!("Pair-Verify failed in {:?}: {}", self.state, e);
                self.state = PairVerifyState::Failed;
                self.ecdh = None;
                self.peer_public = None;
                self.shared_secret = None;
                self.session_key = None;
                Err(e)
            }
        }
    }
}

/// Receiver side of Pair-Verify, used to exercise the controller side.
#[cfg(test)]
pub(crate) mod test_receiver {
    use super::*;
    use airplay_crypto::ed25519::IdentityKeyPair;

    pub(crate) struct VerifyReceiver {
        pub identifier: String,
        pub identity: IdentityKeyPair,
        pub controller_ltpk: [u8; 32],
        ecdh: EcdhKeyPair,
        key: Option<[u8; 32]>,
        shared: Option<Vec<u8>>,
        controller_eph: Option<[u8; 32]>,
    }

    impl VerifyReceiver {
        pub(crate) fn new(controller: &ControllerIdentity) -> Self {
            Self {
                identifier: "AA:BB:CC:DD:EE:FF".to_string(),
                identity: IdentityKeyPair::generate(),
                controller_ltpk: controller.public_key(),
                ecdh: EcdhKeyPair::generate(),
                key: None,
                shared: None,
                controller_eph: None,
            }
        }

        pub(crate) fn paired(&self) -> PairedReceiver {
            PairedReceiver {
                identifier: self.identifier.clone(),
                ltpk: self.identity.public_key(),
            }
        }

        pub(crate) fn m2(&mut self, m1: &[u8]) -> Vec<u8> {
            let tlv = Tlv8::parse(m1).unwrap();
            let controller_eph: [u8; 32] = tlv.get(TlvType::PublicKey).unwrap().try_into().unwrap();
            let shared = self.ecdh.diffie_hellman(&controller_eph).unwrap();
            let key = airplay_crypto::hkdf::derive_pair_verify_key(&shared).unwrap();

            let own_eph = self.ecdh.public_key();
            let signature = self
                .identity
                .sign(&concat3(&own_eph, self.identifier.as_bytes(), &controller_eph));
            let inner = Tlv8::new()
                .with(TlvType::Identifier, self.identifier.as_bytes())
                .with(TlvType::Signature, signature.to_vec());
            let encrypted =
                encrypt_with_nonce(&key, &nonce_from_string(PV_MSG02_NONCE), &inner.encode()).unwrap();

            self.key = Some(key);
            self.shared = Some(shared.to_vec());
            self.controller_eph = Some(controller_eph);
            Tlv8::new()
                .with(TlvType::State, [2u8])
                .with(TlvType::PublicKey, own_eph.to_vec())
                .with(TlvType::EncryptedData, encrypted)
                .encode()
        }

        /// Check M3 and answer with M4; returns the keys from our side.
        pub(crate) fn m4(&mut self, m3: &[u8]) -> (Vec<u8>, SessionKeys) {
            let tlv = Tlv8::parse(m3).unwrap();
            let inner = decrypt_with_nonce(
                &self.key.unwrap(),
                &nonce_from_string(PV_MSG03_NONCE),
                tlv.get(TlvType::EncryptedData).unwrap(),
            )
            .unwrap();
            let inner = Tlv8::parse(&inner).unwrap();
            let id = inner.get(TlvType::Identifier).unwrap();
            let sig = inner.get(TlvType::Signature).unwrap();
            let message = concat3(&self.controller_eph.unwrap(), id, &self.ecdh.public_key());
            ed25519::verify_slice(&self.controller_ltpk, &message, sig).unwrap();

            let shared = SharedSecret::new(self.shared.clone().unwrap());
            let keys = SessionKeys::derive_control_keys(&shared).unwrap().swapped();
            (Tlv8::new().with(TlvType::State, [4u8]).encode(), keys)
        }
    }
}
