//! Seams between the pairing state machines and the outside world.

use airplay_core::error::Result;
use async_trait::async_trait;

/// Which kind of traffic the next messages belong to.
///
/// Transports that wrap pairing bodies in HTTP/RTSP requests use this to
/// pick the endpoint; after [`Exchange::Control`] frames go out raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    PairSetup,
    PairVerify,
    /// Encrypted control frames.
    Control,
    /// Unencrypted RTSP traffic to a receiver that needs no pairing.
    Plain,
}

/// Byte-stream transport to a receiver.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Send one message.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive one message.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Announce the kind of the following messages.
    async fn begin_exchange(&mut self, _exchange: Exchange) -> Result<()> {
        Ok(())
    }
}

/// Source of the receiver's on-screen setup code.
///
/// An empty string cancels the attempt.
#[cfg_attr(test, mockall::automock)]
pub trait PinProvider: Send + Sync {
    fn request_pin(&self) -> String;
}

/// Progress notifications from a running pairing.
pub trait PairingObserver: Send + Sync {
    /// Pair-Setup M4 rejected the code and another attempt will follow.
    fn pin_was_incorrect(&self, _attempts_left: u32) {}
}

/// PIN provider that always answers with the same code.
pub struct StaticPin {
    pin: String,
}

impl StaticPin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self { pin: pin.into() }
    }
}

impl PinProvider for StaticPin {
    fn request_pin(&self) -> String {
        self.pin.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mock_transport {
        use super::*;

        #[tokio::test]
        async fn mock_receive_returns_configured_response() {
            let mut mock = MockTransport::new();

            let expected_response = vec![0x06, 0x01, 0x02]; // State=2
            let expected_clone = expected_response.clone();

            mock.expect_send().returning(|_| Box::pin(async { Ok(()) }));
            mock.expect_receive().returning(move || {
                Box::pin({
                    let resp = expected_clone.clone();
                    async move { Ok(resp) }
                })
            });

            mock.send(&[0x06, 0x01, 0x01]).await.unwrap();
            let result = mock.receive().await.unwrap();
            assert_eq!(result, expected_response);
        }

        #[tokio::test]
        async fn mock_begin_exchange_records_kind() {
            let mut mock = MockTransport::new();
            mock.expect_begin_exchange()
                .withf(|exchange| *exchange == Exchange::PairVerify)
                .times(1)
                .returning(|_| Box::pin(async { Ok(()) }));

            mock.begin_exchange(Exchange::PairVerify).await.unwrap();
        }
    }

    mod pin_provider {
        use super::*;

        #[test]
        fn static_pin_returns_configured_code() {
            let provider = StaticPin::new("291-64-847");
            assert_eq!(provider.request_pin(), "291-64-847");
            assert_eq!(provider.request_pin(), "291-64-847");
        }

        #[test]
        fn mock_pin_provider() {
            let mut mock = MockPinProvider::new();
            mock.expect_request_pin().times(1).return_const(String::from("1234"));
            assert_eq!(mock.request_pin(), "1234");
        }
    }
}
