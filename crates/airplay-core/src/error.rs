//! Error types for the AirPlay 2 sender pairing client.

use thiserror::Error;

/// Primary error type for all pairing and connection operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid usage: {0}")]
    Usage(String),

    #[error("Pairing cancelled by user")]
    Cancelled,
}

/// Machine-readable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Protocol,
    Auth,
    Transport,
    Usage,
    Cancelled,
}

/// Malformed local or remote input (TLV8, TXT records, stored keys).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Peer violated the pairing protocol or refused to continue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Pairing state mismatch: expected {expected}, got {actual}")]
    UnexpectedState { expected: u8, actual: u8 },

    #[error("Missing required TLV type: {0}")]
    MissingTag(u8),

    #[error("Pairing rejected by receiver (code {code}{})", retry_suffix(.retry_delay))]
    Rejected { code: u8, retry_delay: Option<u32> },

    #[error("Invalid pairing state: {0}")]
    InvalidState(String),
}

/// Authentication failures during or after the handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Incorrect setup code")]
    IncorrectSetupCode,

    #[error("CHACHAPOLY_INVALID_MAC")]
    InvalidMac,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Weak shared secret (low-order point)")]
    WeakSharedSecret,

    #[error("Nonce out of sequence: expected {expected}, got {actual}")]
    NonceOutOfSequence { expected: u64, actual: u64 },

    #[error("Receiver identity does not match the paired receiver")]
    UnknownReceiver,
}

/// Byte-stream failures. Always retryable from M1.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Misuse of a cryptographic primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid tag length: {0} (must be 0..=16)")]
    InvalidTagLength(usize),

    #[error("Message too long for short path: {0} bytes")]
    MessageTooLong(usize),
}

fn retry_suffix(retry_delay: &Option<u32>) -> String {
    match retry_delay {
        Some(secs) => format!(", retry after {}s", secs),
        None => String::new(),
    }
}

impl Error {
    /// Classify this error.
    ///
    /// Primitive misuse is reported as [`ErrorKind::Auth`] because it can
    /// only surface while authenticating a peer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_) => ErrorKind::Format,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Auth(_) | Error::Crypto(_) => ErrorKind::Auth,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Usage(_) => ErrorKind::Usage,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True when the user entered the wrong PIN and may be prompted again.
    pub fn is_incorrect_setup_code(&self) -> bool {
        matches!(self, Error::Auth(AuthError::IncorrectSetupCode))
    }

    /// True for failures worth retrying from M1 on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(err))
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
