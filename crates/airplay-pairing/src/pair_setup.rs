//! HomeKit Pair-Setup (M1-M6).
//!
//! SRP-6a over the receiver's setup code proves both sides know the PIN;
//! M5/M6 then exchange long-term Ed25519 identities under the SRP session key.

use airplay_core::error::{AuthError, Error, FormatError, ProtocolError, Result};
use airplay_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519, hkdf,
    keys::{EncryptionKey, SharedSecret},
    srp::{SrpChallenge, SrpClient, SrpProof, N_BYTES, PAIR_SETUP_IDENTITY},
    tlv::{PairingErrorCode, PairingState, Tlv8, TlvType},
};
use tracing::debug;

use crate::controller::ControllerIdentity;
use crate::message::{concat3, parse_response, require, require_array};
use crate::store::PairedReceiver;

const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSetupState {
    Initial,
    M1Sent,
    M2Received,
    M3Sent,
    M4Received,
    M5Sent,
    Complete,
    Failed,
}

/// Pair-Setup state machine for one attempt.
///
/// Any error moves it to [`PairSetupState::Failed`] and drops the SRP state.
/// A retry needs a new instance.
pub struct PairSetup {
    state: PairSetupState,
    controller: ControllerIdentity,
    challenge: Option<SrpChallenge>,
    srp_client: Option<SrpClient>,
    srp_proof: Option<SrpProof>,
    session_key: Option<EncryptionKey>,
    paired: Option<PairedReceiver>,
}

impl PairSetup {
    pub fn new(controller: ControllerIdentity) -> Self {
        Self {
            state: PairSetupState::Initial,
            controller,
            challenge: None,
            srp_client: None,
            srp_proof: None,
            session_key: None,
            paired: None,
        }
    }

    /// M1: `{State=1, Method=PairSetup}`.
    pub fn generate_m1(&mut self) -> Result<Vec<u8>> {
        let result = self.expect_state(PairSetupState::Initial, "M1").map(|_| {
            debug!("Pair-Setup: sending M1");
            Tlv8::pair_setup_m1().encode()
        });
        self.advance(result, PairSetupState::M1Sent)
    }

    /// M2: `{State=2, Salt(16), PublicKey(B)}`.
    pub fn process_m2(&mut self, response: &[u8]) -> Result<()> {
        let result = self.try_process_m2(response);
        self.advance(result, PairSetupState::M2Received)
    }

    fn try_process_m2(&mut self, response: &[u8]) -> Result<()> {
        self.expect_state(PairSetupState::M1Sent, "M2")?;
        let tlv = parse_response(response, PairingState::M2)?;

        let salt = require_array::<16>(&tlv, TlvType::Salt)?;
        let server_public = require(&tlv, TlvType::PublicKey)?;
        if server_public.is_empty() || server_public.len() > N_BYTES {
            return Err(FormatError::InvalidValue(format!(
                "SRP public key is {} bytes, expected 1..={}",
                server_public.len(),
                N_BYTES
            ))
            .into());
        }

        debug!(
            "Pair-Setup: M2 received (salt 16 bytes, B {} bytes)",
            server_public.len()
        );
        self.challenge = Some(SrpChallenge {
            salt,
            server_public_key: server_public.to_vec(),
        });
        Ok(())
    }

    /// M3: `{State=3, PublicKey(A), Proof(M1)}`.
    ///
    /// `pin` is the setup code for this attempt; an empty code cancels.
    pub fn generate_m3(&mut self, pin: &str) -> Result<Vec<u8>> {
        let result = self.try_generate_m3(pin);
        self.advance(result, PairSetupState::M3Sent)
    }

    fn try_generate_m3(&mut self, pin: &str) -> Result<Vec<u8>> {
        self.expect_state(PairSetupState::M2Received, "M3")?;
        if pin.is_empty() {
            return Err(Error::Cancelled);
        }

        let challenge = self
            .challenge
            .take()
            .ok_or_else(|| ProtocolError::InvalidState("SRP challenge missing".to_string()))?;

        let client = SrpClient::new(PAIR_SETUP_IDENTITY, pin.as_bytes())?;
        let proof = client.process_challenge(&challenge)?;

        let m3 = Tlv8::new()
            .with(TlvType::State, [PairingState::M3 as u8])
            .with(TlvType::PublicKey, client.public_key())
            .with(TlvType::Proof, proof.client_proof.clone());

        self.srp_client = Some(client);
        self.srp_proof = Some(proof);
        debug!("Pair-Setup: sending M3");
        Ok(m3.encode())
    }

    /// M4: `{State=4, Proof(M2)}`.
    ///
    /// A wrong PIN shows up either as an `Authentication` error tag or as a
    /// server proof that does not match; both are
    /// [`AuthError::IncorrectSetupCode`].
    pub fn process_m4(&mut self, response: &[u8]) -> Result<()> {
        let result = self.try_process_m4(response);
        self.advance(result, PairSetupState::M4Received)
    }

    fn try_process_m4(&mut self, response: &[u8]) -> Result<()> {
        self.expect_state(PairSetupState::M3Sent, "M4")?;
        let tlv = match parse_response(response, PairingState::M4) {
            Err(Error::Protocol(ProtocolError::Rejected { code, .. }))
                if code == PairingErrorCode::Authentication as u8 =>
            {
                return Err(AuthError::IncorrectSetupCode.into());
            }
            other => other?,
        };

        let server_proof = require(&tlv, TlvType::Proof)?;
        let proof = self
            .srp_proof
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("SRP proof missing".to_string()))?;
        proof.verify_server_proof(server_proof)?;

        let secret = SharedSecret::new(proof.shared_secret.clone());
        self.session_key = Some(EncryptionKey::pair_setup(&secret)?);
        self.srp_client = None;
        debug!("Pair-Setup: M4 verified");
        Ok(())
    }

    /// M5: `{State=5, EncryptedData}` carrying our identifier, LTPK and signature.
    pub fn generate_m5(&mut self) -> Result<Vec<u8>> {
        let result = self.try_generate_m5();
        self.advance(result, PairSetupState::M5Sent)
    }

    fn try_generate_m5(&mut self) -> Result<Vec<u8>> {
        self.expect_state(PairSetupState::M4Received, "M5")?;
        let (proof, session_key) = self.keys()?;

        let mut controller_x = hkdf::derive_controller_sign_key(&proof.shared_secret)?;
        let ltpk = self.controller.public_key();
        let message = concat3(&controller_x, self.controller.id_bytes(), &ltpk);
        controller_x.fill(0);
        let signature = self.controller.sign(&message);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.controller.id_bytes())
            .with(TlvType::PublicKey, ltpk.to_vec())
            .with(TlvType::Signature, signature.to_vec());

        let encrypted = encrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG05_NONCE),
            &inner.encode(),
        )?;

        debug!("Pair-Setup: sending M5 ({} encrypted bytes)", encrypted.len());
        Ok(Tlv8::new()
            .with(TlvType::State, [PairingState::M5 as u8])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// M6: `{State=6, EncryptedData}` carrying the receiver's identity.
    pub fn process_m6(&mut self, response: &[u8]) -> Result<PairedReceiver> {
        let result = self.try_process_m6(response);
        let paired = self.advance(result, PairSetupState::Complete)?;
        self.srp_proof = None;
        self.session_key = None;
        self.paired = Some(paired.clone());
        Ok(paired)
    }

    fn try_process_m6(&mut self, response: &[u8]) -> Result<PairedReceiver> {
        self.expect_state(PairSetupState::M5Sent, "M6")?;
        let tlv = parse_response(response, PairingState::M6)?;
        let encrypted = require(&tlv, TlvType::EncryptedData)?;
        let (proof, session_key) = self.keys()?;

        let decrypted = decrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG06_NONCE),
            encrypted,
        )?;
        let inner = Tlv8::parse(&decrypted)?;

        let identifier = require(&inner, TlvType::Identifier)?;
        let ltpk = require_array::<32>(&inner, TlvType::PublicKey)?;
        let signature = require(&inner, TlvType::Signature)?;

        let mut accessory_x = hkdf::derive_accessory_sign_key(&proof.shared_secret)?;
        let message = concat3(&accessory_x, identifier, &ltpk);
        accessory_x.fill(0);
        ed25519::verify_slice(&ltpk, &message, signature)?;

        let identifier = String::from_utf8(identifier.to_vec())
            .map_err(|_| FormatError::InvalidValue("receiver identifier is not UTF-8".to_string()))?;

        debug!("Pair-Setup: M6 verified, receiver {}", identifier);
        Ok(PairedReceiver { identifier, ltpk })
    }

    pub fn state(&self) -> PairSetupState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == PairSetupState::Complete
    }

    /// Receiver identity once M6 has been processed.
    pub fn paired_receiver(&self) -> Option<&PairedReceiver> {
        self.paired.as_ref()
    }

    fn keys(&self) -> Result<(&SrpProof, &EncryptionKey)> {
        match (&self.srp_proof, &self.session_key) {
            (Some(proof), Some(key)) => Ok((proof, key)),
            _ => Err(ProtocolError::InvalidState("session key not derived".to_string()).into()),
        }
    }

    fn expect_state(&self, expected: PairSetupState, step: &str) -> Result<()> {
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

    /// Move to `next` on success; on failure go to `Failed` and drop secrets.
    fn advance<T>(&mut self, result: Result<T>, next: PairSetupState) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                debug!("Pair-Setup failed in {:?}: {}", self.state, e);
                self.state = PairSetupState::Failed;
                self.challenge = None;
                self.srp_client = None;
                self.srp_proof = None;
                self.session_key = None;
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_receiver::SetupReceiver;
    use super::*;

    const PIN: &str = "291-64-847";

    fn setup() -> PairSetup {
        PairSetup::new(ControllerIdentity::generate())
    }

    /// Run M1..M4 and return both sides.
    fn through_m4() -> (PairSetup, SetupReceiver) {
        let mut setup = setup();
        let mut receiver = SetupReceiver::new(PIN);
        setup.generate_m1().unwrap();
        setup.process_m2(&receiver.m2()).unwrap();
        let m3 = setup.generate_m3(PIN).unwrap();
        setup.process_m4(&receiver.m4(&m3)).unwrap();
        (setup, receiver)
    }

    mod state_machine {
        use super::*;

        #[test]
        fn starts_in_initial_state() {
            assert_eq!(setup().state(), PairSetupState::Initial);
        }

        #[test]
        fn full_flow_completes() {
            let (mut setup, mut receiver) = through_m4();
            assert_eq!(setup.state(), PairSetupState::M4Received);

            let m5 = setup.generate_m5().unwrap();
            let paired = setup.process_m6(&receiver.m6(&m5)).unwrap();

            assert!(setup.is_complete());
            assert_eq!(paired.identifier, receiver.identifier);
            assert_eq!(paired.ltpk, receiver.identity.public_key());
            assert_eq!(setup.paired_receiver(), Some(&paired));
        }

        #[test]
        fn cannot_generate_m3_before_m2() {
            let mut setup = setup();
            setup.generate_m1().unwrap();
            let err = setup.generate_m3(PIN).unwrap_err();
            assert!(matches!(err, Error::Protocol(ProtocolError::InvalidState(_))));
            assert_eq!(setup.state(), PairSetupState::Failed);
        }

        #[test]
        fn cannot_generate_m1_twice() {
            let mut setup = setup();
            setup.generate_m1().unwrap();
            assert!(setup.generate_m1().is_err());
            assert_eq!(setup.state(), PairSetupState::Failed);
        }

        #[test]
        fn failed_machine_stays_failed() {
            let mut setup = setup();
            setup.generate_m1().unwrap();
            assert!(setup.process_m2(&[0x06, 0x05]).is_err());
            let receiver = SetupReceiver::new(PIN);
            assert!(setup.process_m2(&receiver.m2()).is_err());
            assert_eq!(setup.state(), PairSetupState::Failed);
        }
    }

    mod m1_generation {
        use super::*;

        #[test]
        fn m1_contains_state_and_method() {
            let m1 = setup().generate_m1().unwrap();
            let tlv = Tlv8::parse(&m1).unwrap();
            assert_eq!(tlv.state(), Some(1));
            assert_eq!(tlv.get(TlvType::Method), Some(&[0u8][..]));
        }
    }

    mod m2_processing {
        use super::*;

        fn after_m1() -> PairSetup {
            let mut setup = setup();
            setup.generate_m1().unwrap();
            setup
        }

        #[test]
        fn out_of_order_state_fails() {
            let mut setup = after_m1();
            let m4 = Tlv8::new()
                .with(TlvType::State, [4u8])
                .with(TlvType::Proof, vec![0u8; 64])
                .encode();
            let err = setup.process_m2(&m4).unwrap_err();
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::UnexpectedState { expected: 2, actual: 4 })
            ));
            assert_eq!(setup.state(), PairSetupState::Failed);
        }

        #[test]
        fn missing_salt_is_missing_tag() {
            let mut setup = after_m1();
            let m2 = Tlv8::new()
                .with(TlvType::State, [2u8])
                .with(TlvType::PublicKey, vec![1u8; 384])
                .encode();
            let err = setup.process_m2(&m2).unwrap_err();
            assert!(matches!(err, Error::Protocol(ProtocolError::MissingTag(0x02))));
        }

        #[test]
        fn missing_public_key_is_missing_tag() {
            let mut setup = after_m1();
            let m2 = Tlv8::new()
                .with(TlvType::State, [2u8])
                .with(TlvType::Salt, vec![0u8; 16])
                .encode();
            let err = setup.process_m2(&m2).unwrap_err();
            assert!(matches!(err, Error::Protocol(ProtocolError::MissingTag(0x03))));
        }

        #[test]
        fn oversized_public_key_is_rejected() {
            let mut setup = after_m1();
            let m2 = Tlv8::new()
                .with(TlvType::State, [2u8])
                .with(TlvType::Salt, vec![0u8; 16])
                .with(TlvType::PublicKey, vec![1u8; 385])
                .encode();
            assert!(matches!(setup.process_m2(&m2).unwrap_err(), Error::Format(_)));
        }

        #[test]
        fn error_tag_is_rejected_with_code() {
            let mut setup = after_m1();
            let m2 = Tlv8::new()
                .with(TlvType::State, [2u8])
                .with(TlvType::Error, [PairingErrorCode::Busy as u8])
                .encode();
            let err = setup.process_m2(&m2).unwrap_err();
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::Rejected { code: 7, retry_delay: None })
            ));
        }
    }

    mod m3_generation {
        use super::*;

        fn after_m2() -> PairSetup {
            let mut setup = setup();
            setup.generate_m1().unwrap();
            setup.process_m2(&SetupReceiver::new(PIN).m2()).unwrap();
            setup
        }

        #[test]
        fn m3_carries_padded_key_and_proof() {
            let m3 = after_m2().generate_m3(PIN).unwrap();
            let tlv = Tlv8::parse(&m3).unwrap();
            assert_eq!(tlv.state(), Some(3));
            assert_eq!(tlv.get(TlvType::PublicKey).unwrap().len(), 384);
            assert_eq!(tlv.get(TlvType::Proof).unwrap().len(), 64);
        }

        #[test]
        fn empty_pin_cancels() {
            let mut setup = after_m2();
            let err = setup.generate_m3("").unwrap_err();
            assert!(matches!(err, Error::Cancelled));
            assert_eq!(setup.state(), PairSetupState::Failed);
        }
    }

    mod m4_processing {
        use super::*;

        #[test]
        fn wrong_pin_is_incorrect_setup_code() {
            let mut setup = setup();
            let mut receiver = SetupReceiver::new(PIN);
            setup.generate_m1().unwrap();
            setup.process_m2(&receiver.m2()).unwrap();
            let m3 = setup.generate_m3("000-00-000").unwrap();

            let err = setup.process_m4(&receiver.m4(&m3)).unwrap_err();
            assert!(err.is_incorrect_setup_code());
            assert_eq!(setup.state(), PairSetupState::Failed);
        }

        #[test]
        fn tampered_server_proof_is_incorrect_setup_code() {
            let mut setup = setup();
            let receiver = SetupReceiver::new(PIN);
            setup.generate_m1().unwrap();
            setup.process_m2(&receiver.m2()).unwrap();
            setup.generate_m3(PIN).unwrap();

            let m4 = Tlv8::new()
                .with(TlvType::State, [4u8])
                .with(TlvType::Proof, vec![0xAB; 64])
                .encode();
            let err = setup.process_m4(&m4).unwrap_err();
            assert!(matches!(err, Error::Auth(AuthError::IncorrectSetupCode)));
        }

        #[test]
        fn backoff_is_not_a_pin_error() {
            let mut setup = setup();
            let receiver = SetupReceiver::new(PIN);
            setup.generate_m1().unwrap();
            setup.process_m2(&receiver.m2()).unwrap();
            setup.generate_m3(PIN).unwrap();

            let m4 = Tlv8::new()
                .with(TlvType::State, [4u8])
                .with(TlvType::Error, [PairingErrorCode::Backoff as u8])
                .with(TlvType::RetryDelay, [30u8])
                .encode();
            let err = setup.process_m4(&m4).unwrap_err();
            assert!(!err.is_incorrect_setup_code());
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::Rejected { code: 3, retry_delay: Some(30) })
            ));
        }
    }

    mod m5_m6 {
        use super::*;

        #[test]
        fn receiver_sees_our_identity() {
            let (mut setup, mut receiver) = through_m4();
            let id = setup.controller.id().to_string();
            let ltpk = setup.controller.public_key();

            let m5 = setup.generate_m5().unwrap();
            receiver.m6(&m5);
            assert_eq!(receiver.controller, Some((id, ltpk)));
        }

        #[test]
        fn m6_under_wrong_key_is_invalid_mac() {
            let (mut setup, _) = through_m4();
            setup.generate_m5().unwrap();

            let bogus = encrypt_with_nonce(&[9u8; 32], &nonce_from_string(PS_MSG06_NONCE), b"x").unwrap();
            let m6 = Tlv8::new()
                .with(TlvType::State, [6u8])
                .with(TlvType::EncryptedData, bogus)
                .encode();
            let err = setup.process_m6(&m6).unwrap_err();
            assert!(matches!(err, Error::Auth(AuthError::InvalidMac)));
            assert_eq!(setup.state(), PairSetupState::Failed);
        }

        #[test]
        fn bad_receiver_signature_is_rejected() {
            let (mut setup, mut receiver) = through_m4();
            receiver.forge_signature = true;
            let m5 = setup.generate_m5().unwrap();

            let err = setup.process_m6(&receiver.m6(&m5)).unwrap_err();
            assert!(matches!(err, Error::Auth(AuthError::SignatureInvalid)));
            assert!(setup.paired_receiver().is_none());
        }

        #[test]
        fn missing_encrypted_data_is_missing_tag() {
            let (mut setup, _) = through_m4();
            setup.generate_m5().unwrap();
            let m6 = Tlv8::new().with(TlvType::State, [6u8]).encode();
            let err = setup.process_m6(&m6).unwrap_err();
            assert!(matches!(err, Error::Protocol(ProtocolError::MissingTag(0x05))));
        }
    }
}
