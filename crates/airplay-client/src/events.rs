//! Connection events and delegates.

use airplay_core::Error;
use airplay_pairing::PairingObserver;

/// Events reported by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Pairing finished; `encrypted` is false for open receivers.
    PairingCompleted { encrypted: bool },
    /// Pairing failed.
    PairingFailed(String),
    /// The setup code was wrong and the user will be asked again.
    PinIncorrect { attempts_left: u32 },
    /// Connection closed, locally or after an authentication failure.
    Closed,
}

/// Receives connection progress. Every method has a no-op default.
pub trait ConnectionDelegate: Send + Sync {
    fn pairing_did_complete(&self, _encrypted: bool) {}

    fn pairing_did_fail(&self, _error: &Error) {}

    fn pin_was_incorrect(&self, _attempts_left: u32) {}

    fn connection_did_close(&self) {}
}

/// Delegate that ignores everything.
pub struct NoOpDelegate;

impl ConnectionDelegate for NoOpDelegate {}

/// Delegate that forwards every callback as a [`ConnectionEvent`].
pub struct CallbackDelegate<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackDelegate<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ConnectionDelegate for CallbackDelegate<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    fn pairing_did_complete(&self, encrypted: bool) {
        (self.callback)(ConnectionEvent::PairingCompleted { encrypted });
    }

    fn pairing_did_fail(&self, error: &Error) {
        (self.callback)(ConnectionEvent::PairingFailed(error.to_string()));
    }

    fn pin_was_incorrect(&self, attempts_left: u32) {
        (self.callback)(ConnectionEvent::PinIncorrect { attempts_left });
    }

    fn connection_did_close(&self) {
        (self.callback)(ConnectionEvent::Closed);
    }
}

/// Lets the pairing driver report PIN retries through a delegate.
pub(crate) struct DelegateObserver(pub(crate) std::sync::Arc<dyn ConnectionDelegate>);

impl PairingObserver for DelegateObserver {
    fn pin_was_incorrect(&self, attempts_left: u32) {
        self.0.pin_was_incorrect(attempts_left);
    }
}
