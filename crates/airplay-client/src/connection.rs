//! Secure connection to one AirPlay receiver.

use std::net::SocketAddr;
use std::sync::Arc;

use airplay_core::error::{Error, Result, TransportError};
use airplay_core::{PairingRequirement, ReceiverInfo};
use airplay_pairing::{
    ControllerIdentity, EncryptedChannel, PairedReceiver, PairingDriver, PairingOutcome,
    PairingStore, PinProvider, Transport,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::events::{ConnectionDelegate, DelegateObserver};
use crate::transport::TcpTransport;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected yet.
    Idle,
    /// Transport is up, pairing has not started.
    Connected,
    Pairing,
    /// Paired; control traffic is encrypted.
    Encrypted,
    /// Receiver needs no pairing; control traffic is in the clear.
    Unencrypted,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Encrypted | ConnectionState::Unencrypted)
    }
}

struct Shared {
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    channel: Option<EncryptedChannel>,
    store: PairingStore,
}

impl Shared {
    /// Drop transport and keys. Returns false if already closed.
    fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.transport = None;
        self.channel = None;
        self.state = ConnectionState::Closed;
        true
    }
}

/// Sender-side connection: connects, pairs, then carries encrypted
/// control traffic.
pub struct AirPlaySenderConnection {
    host: String,
    name: String,
    port: u16,
    pin_provider: Arc<dyn PinProvider>,
    delegate: Arc<dyn ConnectionDelegate>,
    config: ConnectionConfig,
    receiver_info: Option<ReceiverInfo>,
    shared: Arc<Mutex<Shared>>,
    pairing_task: Option<JoinHandle<Result<()>>>,
}

impl AirPlaySenderConnection {
    /// `name` identifies the receiver in the pairing store.
    pub fn new(
        host: impl Into<String>,
        name: impl Into<String>,
        port: u16,
        pin_provider: Arc<dyn PinProvider>,
        delegate: Arc<dyn ConnectionDelegate>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => PairingStore::open(path)?,
            None => PairingStore::in_memory(),
        };

        Ok(Self {
            host: host.into(),
            name: name.into(),
            port,
            pin_provider,
            delegate,
            config,
            receiver_info: None,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Idle,
                transport: None,
                channel: None,
                store,
            })),
            pairing_task: None,
        })
    }

    /// Use the receiver's discovery record to pick the pairing requirement.
    pub fn with_receiver_info(mut self, info: ReceiverInfo) -> Self {
        self.receiver_info = Some(info);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.lock().await.state
    }

    /// Stored pairing for this receiver, if any.
    pub async fn paired_receiver(&self) -> Option<PairedReceiver> {
        self.shared.lock().await.store.get(&self.name).cloned()
    }

    /// Remove this receiver's pairing record. Returns whether one existed.
    pub async fn forget_pairing(&self) -> Result<bool> {
        self.shared.lock().await.store.remove(&self.name)
    }

    /// Connect over TCP and start pairing.
    pub async fn setup(&mut self) -> Result<()> {
        self.ensure_state(ConnectionState::Idle, "setup").await?;
        let addr = self.resolve().await?;
        let transport = TcpTransport::connect(addr, self.config.connect_timeout).await?;
        self.setup_with_transport(Box::new(transport)).await
    }

    /// Start pairing over an already connected transport.
    pub async fn setup_with_transport(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        {
            let mut shared = self.shared.lock().await;
            if shared.state != ConnectionState::Idle {
                return Err(Error::Usage(format!("setup not allowed in state {:?}", shared.state)));
            }
            shared.transport = Some(transport);
            shared.state = ConnectionState::Connected;
        }
        info!("Connected to {} ({}:{})", self.name, self.host, self.port);
        self.start_pairing().await
    }

    /// Run pairing in the background.
    ///
    /// The outcome goes to the delegate and to [`wait_for_pairing`](Self::wait_for_pairing).
    pub async fn start_pairing(&mut self) -> Result<()> {
        if self.pairing_task.as_ref().map_or(false, |task| !task.is_finished()) {
            return Err(Error::Usage("pairing already in progress".to_string()));
        }

        let (mut transport, known, controller) = {
            let mut shared = self.shared.lock().await;
            if shared.state != ConnectionState::Connected {
                return Err(Error::Usage(format!(
                    "cannot start pairing in state {:?}",
                    shared.state
                )));
            }
            let transport = shared
                .transport
                .take()
                .ok_or_else(|| Error::Usage("not connected".to_string()))?;
            shared.state = ConnectionState::Pairing;
            (
                transport,
                shared.store.get(&self.name).cloned(),
                shared.store.controller().clone(),
            )
        };

        let requirement = self.requirement(known.is_some());
        let controller = match &self.config.controller_id {
            Some(id) => ControllerIdentity::with_id(controller.keypair().clone(), id.clone()),
            None => controller,
        };
        let driver = PairingDriver::new(controller, self.pin_provider.clone())
            .with_response_timeout(self.config.response_timeout)
            .with_pin_attempts(self.config.pin_attempts)
            .with_observer(Arc::new(DelegateObserver(self.delegate.clone())));

        info!("Pairing with {} ({:?})", self.name, requirement);
        let shared = self.shared.clone();
        let delegate = self.delegate.clone();
        let name = self.name.clone();

        self.pairing_task = Some(tokio::spawn(async move {
            let result = driver.run(&mut *transport, requirement, known).await;

            let mut shared = shared.lock().await;
            if shared.state == ConnectionState::Closed {
                return Err(Error::Cancelled);
            }

            match result {
                Ok(outcome) => {
                    let encrypted = outcome.is_encrypted();
                    shared.transport = Some(transport);
                    match outcome {
                        PairingOutcome::Encrypted {
                            keys,
                            receiver,
                            newly_paired,
                        } => {
                            if newly_paired {
                                if let Err(e) = shared.store.insert(name.clone(), receiver) {
                                    warn!("Could not persist pairing for {}: {}", name, e);
                                }
                            }
                            shared.channel = Some(EncryptedChannel::new(&keys));
                            shared.state = ConnectionState::Encrypted;
                        }
                        PairingOutcome::Unencrypted => {
                            shared.state = ConnectionState::Unencrypted;
                        }
                    }
                    drop(shared);
                    info!("Pairing with {} complete (encrypted: {})", name, encrypted);
                    delegate.pairing_did_complete(encrypted);
                    Ok(())
                }
                Err(e) => {
                    shared.state = ConnectionState::Failed;
                    drop(shared);
                    drop(transport);
                    warn!("Pairing with {} failed: {}", name, e);
                    delegate.pairing_did_fail(&e);
                    Err(e)
                }
            }
        }));
        Ok(())
    }

    /// Wait for the pairing started by [`setup`](Self::setup) or
    /// [`start_pairing`](Self::start_pairing).
    pub async fn wait_for_pairing(&mut self) -> Result<()> {
        match self.pairing_task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    debug!("Pairing task ended: {}", e);
                    Err(Error::Cancelled)
                }
            },
            None => match self.state().await {
                state if state.is_ready() => Ok(()),
                ConnectionState::Closed => Err(Error::Cancelled),
                state => Err(Error::Usage(format!("no pairing in progress ({:?})", state))),
            },
        }
    }

    /// Send one control message.
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        let mut guard = self.shared.lock().await;
        let shared = &mut *guard;
        let transport = ready_transport(shared.state, &mut shared.transport)?;
        let result = match shared.channel.as_mut() {
            Some(channel) => match channel.encrypt(plaintext) {
                Ok(frames) => transport.send(&frames).await,
                Err(e) => Err(e),
            },
            None => transport.send(plaintext).await,
        };
        self.check(shared, result)
    }

    /// Receive one control frame and return its plaintext.
    pub async fn receive(&self) -> Result<Vec<u8>> {
        let mut guard = self.shared.lock().await;
        let shared = &mut *guard;
        let transport = ready_transport(shared.state, &mut shared.transport)?;
        let result = match transport.receive().await {
            Ok(frame) => match shared.channel.as_mut() {
                Some(channel) => channel.decrypt(&frame),
                None => Ok(frame),
            },
            Err(e) => Err(e),
        };
        self.check(shared, result)
    }

    /// Send one frame authenticated with caller AD.
    pub async fn send_with_ad(&self, ad: &[u8], plaintext: &[u8]) -> Result<()> {
        let mut guard = self.shared.lock().await;
        let shared = &mut *guard;
        let transport = ready_transport(shared.state, &mut shared.transport)?;
        let channel = shared
            .channel
            .as_mut()
            .ok_or_else(|| Error::Usage("connection is not encrypted".to_string()))?;
        let result = match channel.seal_with_ad(ad, plaintext) {
            Ok(frame) => transport.send(&frame).await,
            Err(e) => Err(e),
        };
        self.check(shared, result)
    }

    /// Receive one frame authenticated with caller AD.
    pub async fn receive_with_ad(&self, ad: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.shared.lock().await;
        let shared = &mut *guard;
        let transport = ready_transport(shared.state, &mut shared.transport)?;
        let channel = shared
            .channel
            .as_mut()
            .ok_or_else(|| Error::Usage("connection is not encrypted".to_string()))?;
        let result = match transport.receive().await {
            Ok(frame) => channel.open_with_ad(ad, &frame),
            Err(e) => Err(e),
        };
        self.check(shared, result)
    }

    /// Close the connection. Safe to call repeatedly.
    ///
    /// Aborts a running pairing, drops the transport and zeroizes the keys.
    pub async fn close(&mut self) {
        if let Some(task) = &self.pairing_task {
            task.abort();
        }
        if self.shared.lock().await.close() {
            info!("Connection to {} closed", self.name);
            self.delegate.connection_did_close();
        }
    }

    /// Close on authentication failures; pass everything else through.
    fn check<T>(&self, shared: &mut Shared, result: Result<T>) -> Result<T> {
        if let Err(Error::Auth(e)) = &result {
            warn!("Closing connection to {}: {}", self.name, e);
            if shared.close() {
                self.delegate.connection_did_close();
            }
        }
        result
    }

    fn requirement(&self, known: bool) -> PairingRequirement {
        if let Some(requirement) = self.config.requirement_override {
            return requirement;
        }
        match &self.receiver_info {
            Some(info) => info.pairing_requirement(known),
            None if known => PairingRequirement::VerifyOnly,
            None => PairingRequirement::SetupThenVerify,
        }
    }

    async fn ensure_state(&self, expected: ConnectionState, what: &str) -> Result<()> {
        let state = self.state().await;
        if state == expected {
            Ok(())
        } else {
            Err(Error::Usage(format!("{} not allowed in state {:?}", what, state)))
        }
    }

    /// Resolve the host, preferring IPv4.
    async fn resolve(&self) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| TransportError::ConnectionRefused(format!("{}: no addresses", self.host)).into())
    }
}

impl Drop for AirPlaySenderConnection {
    fn drop(&mut self) {
        if let Some(task) = self.pairing_task.take() {
            task.abort();
        }
    }
}

fn ready_transport(
    state: ConnectionState,
    transport: &mut Option<Box<dyn Transport>>,
) -> Result<&mut Box<dyn Transport>> {
    if !state.is_ready() {
        return Err(Error::Usage(format!("connection not ready ({:?})", state)));
    }
    transport
        .as_mut()
        .ok_or_else(|| TransportError::Closed.into())
}
