//! Encrypted control channel with length-prefixed framing.
//!
//! After Pair-Verify every control message goes through ChaCha20-Poly1305
//! under a per-direction counter nonce.

use airplay_core::error::{CryptoError, FormatError, Result};
use airplay_crypto::chacha::{parse_block_header, ControlCipher, MAX_TAG_LEN};
use airplay_crypto::keys::SessionKeys;

/// Length of the explicit counter carried by AD frames.
pub const COUNTER_LEN: usize = 8;

/// Encrypted control channel for post-pairing traffic.
///
/// Plain frames:
///
/// ```text
/// +---------------+----------------+----------+
/// | Length (2 LE) | Ciphertext (N) | Tag (16) |
/// +---------------+----------------+----------+
/// ```
///
/// `N` is at most 1024; longer messages become several frames. The length
/// bytes are the AD.
///
/// Frames with caller AD carry the counter explicitly:
///
/// ```text
/// +---------------+----------------+----------------+----------+
/// | Length (2 LE) | Counter (8 LE) | Ciphertext (M) | Tag (16) |
/// +---------------+----------------+----------------+----------+
/// ```
///
/// where `Length = 8 + M`.
pub struct EncryptedChannel {
    cipher: ControlCipher,
}

impl EncryptedChannel {
    pub fn new(keys: &SessionKeys) -> Self {
        Self {
            cipher: keys.cipher(),
        }
    }

    /// Channel with explicit keys, e.g. the receiver's view in tests.
    pub fn with_keys(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            cipher: ControlCipher::new(write_key, read_key),
        }
    }

    /// Encrypt into one or more frames ready for the wire.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.encrypt(plaintext)
    }

    /// Decrypt one or more complete frames.
    pub fn decrypt(&mut self, framed: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(framed)
    }

    /// Seal one frame with caller-supplied AD. The AD is not transmitted.
    pub fn seal_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let body_len = COUNTER_LEN + plaintext.len();
        let length = u16::try_from(body_len).map_err(|_| CryptoError::MessageTooLong(plaintext.len()))?;

        let (counter, sealed) = self.cipher.seal_with_ad(ad, plaintext)?;
        let mut frame = Vec::with_capacity(2 + COUNTER_LEN + sealed.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&counter.to_le_bytes());
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    /// Open one frame produced by [`seal_with_ad`](Self::seal_with_ad).
    ///
    /// The embedded counter must be the next one expected.
    pub fn open_with_ad(&mut self, ad: &[u8], frame: &[u8]) -> Result<Vec<u8>> {
        let (length, total) = parse_block_header(frame)?;
        if (length as usize) < COUNTER_LEN {
            return Err(FormatError::InvalidValue(format!(
                "frame length {} shorter than counter",
                length
            ))
            .into());
        }
        if frame.len() != total {
            return Err(FormatError::InvalidFormat(format!(
                "frame is {} bytes, header says {}",
                frame.len(),
                total
            ))
            .into());
        }

        let mut counter = [0u8; COUNTER_LEN];
        counter.copy_from_slice(&frame[2..2 + COUNTER_LEN]);
        let counter = u64::from_le_bytes(counter);
        self.cipher.open_at(counter, ad, &frame[2 + COUNTER_LEN..])
    }

    /// Next counter used for sending.
    pub fn write_nonce(&self) -> u64 {
        self.cipher.encrypt_counter()
    }

    /// Next counter expected from the peer.
    pub fn read_nonce(&self) -> u64 {
        self.cipher.decrypt_counter()
    }
}

/// Total frame size announced by a frame header, or `None` if fewer than
/// two bytes are available.
pub fn parse_frame_length(header: &[u8]) -> Option<usize> {
    if header.len() < 2 {
        return None;
    }
    Some(2 + u16::from_le_bytes([header[0], header[1]]) as usize + MAX_TAG_LEN)
}
