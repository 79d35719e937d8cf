//! ChaCha20-Poly1305 AEAD (RFC 8439) with caller-chosen tag length.
//!
//! Tags may be truncated to 0..=16 bytes. A zero-length tag means the
//! keystream is applied without authentication. Messages up to
//! [`SHORT_MAX`] bytes can go through a stack-only path that never
//! writes unauthenticated plaintext into the caller's buffer.

use airplay_core::error::{AuthError, CryptoError, Result};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const MAX_TAG_LEN: usize = 16;

/// Largest message accepted by the short path.
pub const SHORT_MAX: usize = 32;

/// Largest plaintext carried in one control frame.
pub const MAX_BLOCK: usize = 0x400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Encrypt or decrypt `input` into `output`.
///
/// `tag.len()` selects the tag length. On [`Direction::Encrypt`] the tag is
/// written; on [`Direction::Decrypt`] it is checked against the recomputed
/// full tag's prefix in constant time. On a mismatch `output` is zeroized
/// and [`AuthError::InvalidMac`] is returned.
pub fn crypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    input: &[u8],
    output: &mut [u8],
    tag: &mut [u8],
    direction: Direction,
) -> Result<()> {
    check_lengths(input, output, tag)?;
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = Nonce::from_slice(nonce);

    output.copy_from_slice(input);
    match direction {
        Direction::Encrypt => seal_in_place(&cipher, nonce, ad, output, tag),
        Direction::Decrypt if tag.len() == MAX_TAG_LEN => {
            let full = Tag::from_slice(tag);
            cipher
                .decrypt_in_place_detached(nonce, ad, output, full)
                .map_err(|_| {
                    output.zeroize();
                    AuthError::InvalidMac.into()
                })
        }
        Direction::Decrypt => {
            let mut check = input.to_vec();
            let result = open_truncated(&cipher, nonce, ad, output, &mut check, tag);
            check.zeroize();
            result
        }
    }
}

/// [`crypt`] for messages of at most [`SHORT_MAX`] bytes.
///
/// Works in fixed stack buffers and copies into `output` only after the
/// tag has been checked.
pub fn crypt_short(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    input: &[u8],
    output: &mut [u8],
    tag: &mut [u8],
    direction: Direction,
) -> Result<()> {
    if input.len() > SHORT_MAX {
        return Err(CryptoError::MessageTooLong(input.len()).into());
    }
    check_lengths(input, output, tag)?;
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = Nonce::from_slice(nonce);
    let len = input.len();

    let mut work = [0u8; SHORT_MAX];
    let mut check = [0u8; SHORT_MAX];
    work[..len].copy_from_slice(input);

    let result = match direction {
        Direction::Encrypt => seal_in_place(&cipher, nonce, ad, &mut work[..len], tag),
        Direction::Decrypt => {
            check[..len].copy_from_slice(input);
            open_truncated(&cipher, nonce, ad, &mut work[..len], &mut check[..len], tag)
        }
    };
    if result.is_ok() {
        output.copy_from_slice(&work[..len]);
    }

    work.zeroize();
    check.zeroize();
    result
}

/// Encrypt at most [`SHORT_MAX`] bytes without touching the heap.
pub fn seal_short(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    plaintext: &[u8],
    ciphertext: &mut [u8],
    tag: &mut [u8],
) -> Result<()> {
    crypt_short(key, nonce, ad, plaintext, ciphertext, tag, Direction::Encrypt)
}

/// Decrypt at most [`SHORT_MAX`] bytes without touching the heap.
pub fn open_short(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    plaintext: &mut [u8],
) -> Result<()> {
    if tag.len() > MAX_TAG_LEN {
        return Err(CryptoError::InvalidTagLength(tag.len()).into());
    }
    let mut tag_buf = [0u8; MAX_TAG_LEN];
    tag_buf[..tag.len()].copy_from_slice(tag);
    crypt_short(
        key,
        nonce,
        ad,
        ciphertext,
        plaintext,
        &mut tag_buf[..tag.len()],
        Direction::Decrypt,
    )
}

/// Pick [`crypt_short`] or [`crypt`] by message size.
pub fn crypt_auto(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    input: &[u8],
    output: &mut [u8],
    tag: &mut [u8],
    direction: Direction,
) -> Result<()> {
    if input.len() <= SHORT_MAX {
        crypt_short(key, nonce, ad, input, output, tag, direction)
    } else {
        crypt(key, nonce, ad, input, output, tag, direction)
    }
}

/// Encrypt and return `(ciphertext, tag)` with a `tag_len`-byte tag.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    plaintext: &[u8],
    tag_len: usize,
) -> Result<(Vec<u8>, Vec<u8>)> {
    if tag_len > MAX_TAG_LEN {
        return Err(CryptoError::InvalidTagLength(tag_len).into());
    }
    let mut ciphertext = vec![0u8; plaintext.len()];
    let mut tag = vec![0u8; tag_len];
    crypt_auto(
        key,
        nonce,
        ad,
        plaintext,
        &mut ciphertext,
        &mut tag,
        Direction::Encrypt,
    )?;
    Ok((ciphertext, tag))
}

/// Authenticate and decrypt. The tag length is taken from `tag`.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    if tag.len() > MAX_TAG_LEN {
        return Err(CryptoError::InvalidTagLength(tag.len()).into());
    }
    let mut plaintext = vec![0u8; ciphertext.len()];
    let mut tag_buf = [0u8; MAX_TAG_LEN];
    tag_buf[..tag.len()].copy_from_slice(tag);
    crypt_auto(
        key,
        nonce,
        ad,
        ciphertext,
        &mut plaintext,
        &mut tag_buf[..tag.len()],
        Direction::Decrypt,
    )?;
    Ok(plaintext)
}

fn check_lengths(input: &[u8], output: &[u8], tag: &[u8]) -> Result<()> {
    if tag.len() > MAX_TAG_LEN {
        return Err(CryptoError::InvalidTagLength(tag.len()).into());
    }
    if output.len() != input.len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: input.len(),
            actual: output.len(),
        }
        .into());
    }
    Ok(())
}

fn seal_in_place(
    cipher: &ChaCha20Poly1305,
    nonce: &Nonce,
    ad: &[u8],
    buffer: &mut [u8],
    tag: &mut [u8],
) -> Result<()> {
    let full = cipher
        .encrypt_in_place_detached(nonce, ad, buffer)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    tag.copy_from_slice(&full[..tag.len()]);
    Ok(())
}

/// `plain` holds the ciphertext on entry and the plaintext on success.
/// `check` is scratch of the same length.
fn open_truncated(
    cipher: &ChaCha20Poly1305,
    nonce: &Nonce,
    ad: &[u8],
    plain: &mut [u8],
    check: &mut [u8],
    tag: &[u8],
) -> Result<()> {
    // the keystream pass turns ciphertext into plaintext
    cipher
        .encrypt_in_place_detached(nonce, ad, plain)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    if tag.is_empty() {
        return Ok(());
    }

    // re-encrypting the candidate yields the tag over the received ciphertext
    check.copy_from_slice(plain);
    let full = cipher
        .encrypt_in_place_detached(nonce, ad, check)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    if bool::from(full[..tag.len()].ct_eq(tag)) {
        Ok(())
    } else {
        plain.zeroize();
        Err(AuthError::InvalidMac.into())
    }
}

/// Encrypt with a 12-byte nonce and empty AD, appending a 16-byte tag.
pub fn encrypt_with_nonce(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let (mut out, tag) = seal(key, nonce, &[], plaintext, MAX_TAG_LEN)?;
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Inverse of [`encrypt_with_nonce`].
pub fn decrypt_with_nonce(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext_with_tag: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext_with_tag.len() < MAX_TAG_LEN {
        return Err(AuthError::InvalidMac.into());
    }
    let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - MAX_TAG_LEN);
    open(key, nonce, &[], ciphertext, tag)
}

/// Right-align a label in a zeroed 12-byte nonce.
///
/// `"PV-Msg02"` becomes `00 00 00 00 'P' 'V' '-' 'M' 's' 'g' '0' '2'`.
pub fn nonce_from_string(s: &[u8]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    let len = s.len().min(NONCE_LEN);
    nonce[NONCE_LEN - len..].copy_from_slice(&s[..len]);
    nonce
}

/// Little-endian counter in bytes 4..12.
pub fn nonce_from_counter(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Control channel cipher with one key and one counter per direction.
///
/// Framed messages are split into blocks of at most [`MAX_BLOCK`] bytes,
/// each `[u16 LE len][ciphertext][16-byte tag]` with the length bytes as AD.
/// Blocks of at most [`SHORT_MAX`] bytes go through the short path.
#[derive(ZeroizeOnDrop)]
pub struct ControlCipher {
    write_key: [u8; KEY_LEN],
    read_key: [u8; KEY_LEN],
    #[zeroize(skip)]
    write_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    read_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
}

impl ControlCipher {
    pub fn new(write_key: [u8; KEY_LEN], read_key: [u8; KEY_LEN]) -> Self {
        Self {
            write_cipher: ChaCha20Poly1305::new(&write_key.into()),
            read_cipher: ChaCha20Poly1305::new(&read_key.into()),
            write_key,
            read_key,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// Encrypt plaintext into one or more length-prefixed blocks.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(CryptoError::Encryption("empty plaintext".to_string()).into());
        }

        let blocks = (plaintext.len() + MAX_BLOCK - 1) / MAX_BLOCK;
        let mut out = Vec::with_capacity(plaintext.len() + blocks * (2 + MAX_TAG_LEN));
        for block in plaintext.chunks(MAX_BLOCK) {
            let aad = (block.len() as u16).to_le_bytes();
            let sealed = self.seal_next(&aad, block)?;
            out.extend_from_slice(&aad);
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }

    /// Decrypt one or more length-prefixed blocks.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        let mut offset = 0;

        while offset < data.len() {
            let (block_len, consumed) = parse_block_header(&data[offset..])?;
            let block = &data[offset + 2..offset + consumed];
            let plaintext = self.decrypt_block(block, block_len)?;
            out.extend_from_slice(&plaintext);
            offset += consumed;
        }

        Ok(out)
    }

    /// Decrypt a single block body (ciphertext plus tag).
    pub fn decrypt_block(&mut self, ciphertext_with_tag: &[u8], block_len: u16) -> Result<Vec<u8>> {
        if ciphertext_with_tag.len() != block_len as usize + MAX_TAG_LEN {
            return Err(AuthError::InvalidMac.into());
        }
        let counter = self.decrypt_counter;
        self.open_at(counter, &block_len.to_le_bytes(), ciphertext_with_tag)
    }

    /// Seal with caller-supplied AD under the next write counter.
    ///
    /// Returns the counter used and `ciphertext || tag`.
    pub fn seal_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<(u64, Vec<u8>)> {
        let counter = self.encrypt_counter;
        let sealed = self.seal_next(ad, plaintext)?;
        Ok((counter, sealed))
    }

    /// Open `ciphertext || tag` sealed under `counter`.
    ///
    /// `counter` must be exactly the next expected read counter; replays and
    /// gaps are rejected before any decryption happens.
    pub fn open_at(&mut self, counter: u64, ad: &[u8], ciphertext_with_tag: &[u8]) -> Result<Vec<u8>> {
        if counter != self.decrypt_counter {
            return Err(AuthError::NonceOutOfSequence {
                expected: self.decrypt_counter,
                actual: counter,
            }
            .into());
        }
        if ciphertext_with_tag.len() < MAX_TAG_LEN {
            return Err(AuthError::InvalidMac.into());
        }

        let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - MAX_TAG_LEN);
        let nonce = nonce_from_counter(counter);
        let buffer = if ciphertext.len() <= SHORT_MAX {
            let mut plaintext = vec![0u8; ciphertext.len()];
            open_short(&self.read_key, &nonce, ad, ciphertext, tag, &mut plaintext)?;
            plaintext
        } else {
            let mut buffer = ciphertext.to_vec();
            self.read_cipher
                .decrypt_in_place_detached(Nonce::from_slice(&nonce), ad, &mut buffer, Tag::from_slice(tag))
                .map_err(|_| AuthError::InvalidMac)?;
            buffer
        };

        self.decrypt_counter = next_counter(self.decrypt_counter)?;
        Ok(buffer)
    }

    fn seal_next(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let next = next_counter(self.encrypt_counter)?;
        let nonce = nonce_from_counter(self.encrypt_counter);

        let buffer = if plaintext.len() <= SHORT_MAX {
            let mut sealed = vec![0u8; plaintext.len() + MAX_TAG_LEN];
            let (ciphertext, tag) = sealed.split_at_mut(plaintext.len());
            seal_short(&self.write_key, &nonce, ad, plaintext, ciphertext, tag)?;
            sealed
        } else {
            let mut buffer = Vec::with_capacity(plaintext.len() + MAX_TAG_LEN);
            buffer.extend_from_slice(plaintext);
            let tag = self
                .write_cipher
                .encrypt_in_place_detached(Nonce::from_slice(&nonce), ad, &mut buffer)
                .map_err(|e| CryptoError::Encryption(e.to_string()))?;
            buffer.extend_from_slice(&tag);
            buffer
        };

        self.encrypt_counter = next;
        Ok(buffer)
    }

    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }
}

/// Parse a `[u16 LE len]` header and return `(len, total block size)`.
///
/// Fails with a truncation error when `data` does not yet hold the whole block.
pub fn parse_block_header(data: &[u8]) -> Result<(u16, usize)> {
    if data.len() < 2 {
        return Err(airplay_core::FormatError::Truncated {
            offset: 0,
            needed: 2,
            available: data.len(),
        }
        .into());
    }
    let block_len = u16::from_le_bytes([data[0], data[1]]);
    let total = 2 + block_len as usize + MAX_TAG_LEN;
    if data.len() < total {
        return Err(airplay_core::FormatError::Truncated {
            offset: 2,
            needed: total - 2,
            available: data.len() - 2,
        }
        .into());
    }
    Ok((block_len, total))
}

fn next_counter(counter: u64) -> Result<u64> {
    counter
        .checked_add(1)
        .ok_or_else(|| CryptoError::Encryption("nonce counter exhausted".to_string()).into())
}
