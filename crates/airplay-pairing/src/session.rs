//! Pairing driver.
//!
//! Runs Pair-Setup and Pair-Verify over a [`Transport`], choosing the
//! sequence from the receiver's [`PairingRequirement`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use airplay_core::error::{Error, Result, TransportError};
use airplay_core::PairingRequirement;
use airplay_crypto::keys::SessionKeys;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::controller::ControllerIdentity;
use crate::pair_setup::PairSetup;
use crate::pair_verify::PairVerify;
use crate::store::PairedReceiver;
use crate::traits::{Exchange, PairingObserver, PinProvider, Transport};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PIN_ATTEMPTS: u32 = 3;

/// Result of a successful pairing run.
pub enum PairingOutcome {
    /// Pair-Verify completed; traffic from here on is encrypted.
    Encrypted {
        keys: SessionKeys,
        receiver: PairedReceiver,
        /// Pair-Setup ran in this session and `receiver` should be stored.
        newly_paired: bool,
    },
    /// Receiver does not require pairing.
    Unencrypted,
}

impl PairingOutcome {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, PairingOutcome::Encrypted { .. })
    }
}

impl fmt::Debug for PairingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingOutcome::Encrypted {
                receiver,
                newly_paired,
                ..
            } => f
                .debug_struct("Encrypted")
                .field("receiver", &receiver.identifier)
                .field("newly_paired", newly_paired)
                .finish_non_exhaustive(),
            PairingOutcome::Unencrypted => f.write_str("Unencrypted"),
        }
    }
}

/// Drives the pairing exchanges for one connection.
///
/// Every attempt starts from M1 with fresh state; nothing is carried over
/// from a failed attempt.
pub struct PairingDriver {
    controller: ControllerIdentity,
    pin_provider: Arc<dyn PinProvider>,
    observer: Option<Arc<dyn PairingObserver>>,
    response_timeout: Duration,
    pin_attempts: u32,
}

impl PairingDriver {
    pub fn new(controller: ControllerIdentity, pin_provider: Arc<dyn PinProvider>) -> Self {
        Self {
            controller,
            pin_provider,
            observer: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            pin_attempts: DEFAULT_PIN_ATTEMPTS,
        }
    }

    /// How long to wait for each response.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Total number of PIN entries allowed. At least one is always made.
    pub fn with_pin_attempts(mut self, attempts: u32) -> Self {
        self.pin_attempts = attempts.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PairingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn controller(&self) -> &ControllerIdentity {
        &self.controller
    }

    /// Pair with the receiver behind `transport`.
    ///
    /// `known` is the stored identity of this receiver, required for
    /// [`PairingRequirement::VerifyOnly`].
    pub async fn run<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        requirement: PairingRequirement,
        known: Option<PairedReceiver>,
    ) -> Result<PairingOutcome> {
        debug!("Pairing requirement: {:?}", requirement);
        let outcome = match requirement {
            PairingRequirement::None => {
                info!("Receiver does not require pairing");
                PairingOutcome::Unencrypted
            }
            PairingRequirement::VerifyOnly => {
                let receiver = known.ok_or_else(|| {
                    Error::Usage("Pair-Verify requires a paired receiver".to_string())
                })?;
                let keys = self.verify(transport, receiver.clone()).await?;
                PairingOutcome::Encrypted {
                    keys,
                    receiver,
                    newly_paired: false,
                }
            }
            PairingRequirement::SetupThenVerify => {
                let receiver = self.setup_with_retries(transport).await?;
                let keys = self.verify(transport, receiver.clone()).await?;
                PairingOutcome::Encrypted {
                    keys,
                    receiver,
                    newly_paired: true,
                }
            }
        };

        let exchange = if outcome.is_encrypted() {
            Exchange::Control
        } else {
            Exchange::Plain
        };
        transport.begin_exchange(exchange).await?;
        Ok(outcome)
    }

    async fn setup_with_retries<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<PairedReceiver> {
        let mut attempts_left = self.pin_attempts.max(1);
        loop {
            attempts_left -= 1;
            match self.setup_once(transport).await {
                Err(e) if e.is_incorrect_setup_code() && attempts_left > 0 => {
                    warn!("Setup code rejected, {} attempts left", attempts_left);
                    if let Some(observer) = &self.observer {
                        observer.pin_was_incorrect(attempts_left);
                    }
                }
                other => return other,
            }
        }
    }

    async fn setup_once<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<PairedReceiver> {
        transport.begin_exchange(Exchange::PairSetup).await?;
        let mut setup = PairSetup::new(self.controller.clone());

        let m1 = setup.generate_m1()?;
        let m2 = self.round_trip(transport, &m1).await?;
        setup.process_m2(&m2)?;

        let mut pin = self.request_pin().await?;
        let m3 = setup.generate_m3(&pin);
        pin.zeroize();
        let m4 = self.round_trip(transport, &m3?).await?;
        setup.process_m4(&m4)?;

        let m5 = setup.generate_m5()?;
        let m6 = self.round_trip(transport, &m5).await?;
        let paired = setup.process_m6(&m6)?;

        info!("Pair-Setup complete with {}", paired.identifier);
        Ok(paired)
    }

    /// Ask for the setup code on the blocking pool so a slow prompt never
    /// holds up the runtime.
    async fn request_pin(&self) -> Result<String> {
        let provider = self.pin_provider.clone();
        tokio::task::spawn_blocking(move || provider.request_pin())
            .await
            .map_err(|e| {
                warn!("PIN prompt did not finish: {}", e);
                Error::Cancelled
            })
    }

    async fn verify<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        receiver: PairedReceiver,
    ) -> Result<SessionKeys> {
        transport.begin_exchange(Exchange::PairVerify).await?;
        let mut verify = PairVerify::new(self.controller.clone(), receiver);

        let m1 = verify.generate_m1()?;
        let m2 = self.round_trip(transport, &m1).await?;
        verify.process_m2(&m2)?;

        let m3 = verify.generate_m3()?;
        let m4 = self.round_trip(transport, &m3).await?;
        let keys = verify.process_m4(&m4)?;

        info!("Pair-Verify complete with {}", verify.receiver().identifier);
        Ok(keys)
    }

    async fn round_trip<T: Transport + ?Sized>(&self, transport: &mut T, request: &[u8]) -> Result<Vec<u8>> {
        transport.send(request).await?;
        match tokio::time::timeout(self.response_timeout, transport.receive()).await {
            Ok(response) => response,
            Err(_) => {
                warn!("No response within {:?}", self.response_timeout);
                Err(TransportError::Timeout.into())
            }
        }
    }
}
