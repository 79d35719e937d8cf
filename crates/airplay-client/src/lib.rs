//! # airplay-client
//!
//! Sender-side secure connection to an AirPlay receiver.
//!
//! This crate provides:
//! - [`AirPlaySenderConnection`], which connects, pairs and then encrypts
//!   control traffic
//! - A TCP transport that speaks RTSP during pairing
//! - Connection configuration and delegate callbacks
//!
//! ## Example
//!
//! ```ignore
//! use airplay_client::{AirPlaySenderConnection, ConnectionConfig, NoOpDelegate};
//! use airplay_pairing::StaticPin;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> airplay_client::Result<()> {
//!     let mut conn = AirPlaySenderConnection::new(
//!         "192.168.1.20",
//!         "Living Room",
//!         7000,
//!         Arc::new(StaticPin::new("291-64-847")),
//!         Arc::new(NoOpDelegate),
//!         ConnectionConfig::from_env(),
//!     )?;
//!     conn.setup().await?;
//!     conn.wait_for_pairing().await?;
//!     conn.send(b"GET /info RTSP/1.0\r\nCSeq: 3\r\n\r\n").await?;
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod events;
mod transport;

pub use config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};
pub use connection::{AirPlaySenderConnection, ConnectionState};
pub use events::{CallbackDelegate, ConnectionDelegate, ConnectionEvent, NoOpDelegate};
pub use transport::{build_request, parse_status_line, StreamTransport, TcpTransport};

// Re-export commonly used types
pub use airplay_core::{Error, ErrorKind, PairingRequirement, ReceiverInfo, Result};
pub use airplay_pairing::{PairedReceiver, PinProvider, StaticPin};
