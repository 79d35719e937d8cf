//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across consecutive records
//! of the same type; every fragment but the last is exactly 255 bytes.

use airplay_core::error::FormatError;

const MAX_FRAGMENT: usize = 255;

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Step number carried under [`TlvType::State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PairingState {
    M1 = 1,
    M2 = 2,
    M3 = 3,
    M4 = 4,
    M5 = 5,
    M6 = 6,
}

/// Value carried under [`TlvType::Method`] in the first message of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingMethod {
    PairSetup = 0,
    PairSetupWithAuth = 1,
    PairVerify = 2,
    AddPairing = 3,
    RemovePairing = 4,
    ListPairings = 5,
}

/// Value carried under [`TlvType::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingErrorCode {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

/// One decoded record, with fragments already reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvItem {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl TlvItem {
    pub fn new(tag: impl Into<u8>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

/// Decode a byte buffer into ordered items.
///
/// A record continues the previous item only when it has the same tag and
/// the previous fragment was exactly 255 bytes. Otherwise it starts a new
/// item, so repeated tags (e.g. around a separator) stay distinct.
pub fn decode(data: &[u8]) -> Result<Vec<TlvItem>, FormatError> {
    let mut items: Vec<TlvItem> = Vec::new();
    let mut last_fragment_len = 0usize;
    let mut i = 0;

    while i < data.len() {
        if i + 2 > data.len() {
            return Err(FormatError::Truncated {
                offset: i,
                needed: 2,
                available: data.len() - i,
            });
        }

        let tag = data[i];
        let len = data[i + 1] as usize;
        i += 2;

        if i + len > data.len() {
            return Err(FormatError::Truncated {
                offset: i,
                needed: len,
                available: data.len() - i,
            });
        }

        let value = &data[i..i + len];
        i += len;

        match items.last_mut() {
            Some(prev) if prev.tag == tag && last_fragment_len == MAX_FRAGMENT => {
                prev.value.extend_from_slice(value);
            }
            _ => items.push(TlvItem::new(tag, value)),
        }
        last_fragment_len = len;
    }

    Ok(items)
}

/// Encode items in order.
///
/// A value whose length is a non-zero multiple of 255 is followed by a
/// zero-length record so the decoder knows it has ended.
pub fn encode(items: &[TlvItem]) -> Vec<u8> {
    let total: usize = items
        .iter()
        .map(|item| item.value.len() + 2 * (item.value.len() / MAX_FRAGMENT + 1))
        .sum();
    let mut out = Vec::with_capacity(total);

    for item in items {
        for chunk in item.value.chunks(MAX_FRAGMENT) {
            out.push(item.tag);
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
        if item.value.len() % MAX_FRAGMENT == 0 {
            // empty value, or terminal fragment after an exact multiple
            out.push(item.tag);
            out.push(0);
        }
    }

    out
}

/// First item with the given tag.
pub fn lookup(items: &[TlvItem], tag: u8) -> Option<&TlvItem> {
    items.iter().find(|item| item.tag == tag)
}

/// An ordered TLV8 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<TlvItem>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            items: decode(data)?,
        })
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.items)
    }

    /// Append a value. Order of insertion is the order on the wire.
    pub fn push(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.items.push(TlvItem::new(typ, value));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.push(typ, value);
        self
    }

    /// First value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// First value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        lookup(&self.items, typ).map(|item| item.value.as_slice())
    }

    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    pub fn items(&self) -> &[TlvItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<TlvItem> {
        self.items
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Retry delay in seconds, little-endian, 1 to 4 bytes.
    pub fn retry_delay(&self) -> Option<u32> {
        self.get(TlvType::RetryDelay).map(|v| {
            v.iter()
                .take(4)
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
        })
    }

    /// Human-readable description of the error tag, if present.
    pub fn error_description(&self) -> Option<String> {
        let code = self.error()?;
        let name = match PairingErrorCode::from_byte(code) {
            Some(PairingErrorCode::Unknown) => "Unknown",
            Some(PairingErrorCode::Authentication) => "Authentication",
            Some(PairingErrorCode::Backoff) => "Backoff (rate limited)",
            Some(PairingErrorCode::MaxPeers) => "MaxPeers",
            Some(PairingErrorCode::MaxTries) => "MaxTries",
            Some(PairingErrorCode::Unavailable) => "Unavailable",
            Some(PairingErrorCode::Busy) => "Busy",
            None => "Unknown error code",
        };

        let mut desc = format!("Error 0x{:02x}: {}", code, name);
        if let Some(delay) = self.retry_delay().filter(|d| *d > 0) {
            desc.push_str(&format!(" (retry after {} seconds)", delay));
        }
        Some(desc)
    }

    /// Pair-Setup M1: `{State=1, Method=PairSetup}`.
    pub fn pair_setup_m1() -> Self {
        Self::new()
            .with(TlvType::State, [PairingState::M1 as u8])
            .with(TlvType::Method, [PairingMethod::PairSetup as u8])
    }

    /// Pair-Verify M1: `{State=1, PublicKey}`.
    pub fn pair_verify_m1(public_key: &[u8; 32]) -> Self {
        Self::new()
            .with(TlvType::State, [PairingState::M1 as u8])
            .with(TlvType::PublicKey, public_key.to_vec())
    }
}

impl From<TlvType> for u8 {
    fn from(typ: TlvType) -> u8 {
        typ as u8
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

impl PairingState {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::M1),
            2 => Some(Self::M2),
            3 => Some(Self::M3),
            4 => Some(Self::M4),
            5 => Some(Self::M5),
            6 => Some(Self::M6),
            _ => None,
        }
    }
}

impl PairingErrorCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod decoding {
        use super::*;

        #[test]
        fn decode_empty() {
            assert!(decode(&[]).unwrap().is_empty());
        }

        #[test]
        fn decode_keeps_order() {
            let data = [
                0x06, 0x01, 0x01, // State=1
                0x00, 0x01, 0x00, // Method=0
            ];
            let items = decode(&data).unwrap();
            assert_eq!(
                items,
                vec![TlvItem::new(6u8, vec![1]), TlvItem::new(0u8, vec![0])]
            );
        }

        #[test]
        fn decode_zero_length_value() {
            let items = decode(&[0x06, 0x00]).unwrap();
            assert_eq!(items, vec![TlvItem::new(6u8, vec![])]);
        }

        #[test]
        fn decode_reassembles_fragments() {
            let mut data = vec![0x03, 0xFF];
            data.extend(vec![0xAA; 255]);
            data.extend([0x03, 0x2D]);
            data.extend(vec![0xBB; 45]);

            let items = decode(&data).unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].value.len(), 300);
            assert!(items[0].value[..255].iter().all(|&b| b == 0xAA));
            assert!(items[0].value[255..].iter().all(|&b| b == 0xBB));
        }

        #[test]
        fn same_tag_after_short_fragment_is_a_new_item() {
            let data = [
                0x01, 0x02, b'a', b'b', // Identifier "ab"
                0x01, 0x02, b'c', b'd', // Identifier "cd"
            ];
            let items = decode(&data).unwrap();
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].value, b"ab");
            assert_eq!(items[1].value, b"cd");
        }

        #[test]
        fn separator_splits_repeated_tags() {
            let data = [0x01, 0x01, b'x', 0xFF, 0x00, 0x01, 0x01, b'y'];
            let items = decode(&data).unwrap();
            assert_eq!(items.len(), 3);
            assert_eq!(items[1].tag, TlvType::Separator as u8);
            assert_eq!(items[2].value, b"y");
        }

        #[test]
        fn full_fragment_without_terminator_ends_at_tag_change() {
            let mut data = vec![0x03, 0xFF];
            data.extend(vec![0x11; 255]);
            data.extend([0x06, 0x01, 0x02]);
            let items = decode(&data).unwrap();
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].value.len(), 255);
        }

        #[test]
        fn truncated_header_is_an_error() {
            assert_eq!(
                decode(&[0x06]).unwrap_err(),
                FormatError::Truncated {
                    offset: 0,
                    needed: 2,
                    available: 1
                }
            );
        }

        #[test]
        fn truncated_value_is_an_error() {
            let err = decode(&[0x06, 0x05, 0x01, 0x02]).unwrap_err();
            assert!(matches!(err, FormatError::Truncated { needed: 5, .. }));
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn encode_empty_list() {
            assert!(encode(&[]).is_empty());
        }

        #[test]
        fn encode_empty_value_as_zero_length_record() {
            assert_eq!(encode(&[TlvItem::new(TlvType::Separator, vec![])]), vec![0xFF, 0x00]);
        }

        #[test]
        fn encode_preserves_insertion_order() {
            let tlv = Tlv8::new()
                .with(TlvType::State, [0x01])
                .with(TlvType::Method, [0x00]);
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x01, 0x00, 0x01, 0x00]);
        }

        #[test]
        fn encode_fragments_long_values() {
            let long_value: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
            let encoded = encode(&[TlvItem::new(TlvType::PublicKey, long_value.clone())]);

            assert_eq!(encoded.len(), 2 + 255 + 2 + 45);
            assert_eq!(&encoded[..2], &[0x03, 255]);
            assert_eq!(&encoded[2..257], &long_value[..255]);
            assert_eq!(&encoded[257..259], &[0x03, 45]);
            assert_eq!(&encoded[259..], &long_value[255..]);
        }

        #[test]
        fn exact_multiple_gets_terminal_fragment() {
            let encoded = encode(&[TlvItem::new(TlvType::EncryptedData, vec![0x5A; 510])]);
            assert_eq!(encoded.len(), 2 + 255 + 2 + 255 + 2);
            assert_eq!(&encoded[encoded.len() - 2..], &[0x05, 0x00]);
        }

        #[test]
        fn roundtrip_lengths_around_fragment_boundary() {
            for len in [0usize, 1, 254, 255, 256, 384, 509, 510, 511, 765] {
                let items = vec![
                    TlvItem::new(TlvType::State, vec![0x03]),
                    TlvItem::new(TlvType::PublicKey, vec![0xAB; len]),
                    TlvItem::new(TlvType::Proof, vec![0xCD; 64]),
                ];
                let decoded = decode(&encode(&items)).unwrap();
                assert_eq!(decoded, items, "length {}", len);
            }
        }

        #[test]
        fn adjacent_same_tag_items_survive_roundtrip() {
            let items = vec![
                TlvItem::new(TlvType::Identifier, vec![0x01; 255]),
                TlvItem::new(TlvType::Identifier, vec![0x02; 3]),
            ];
            assert_eq!(decode(&encode(&items)).unwrap(), items);
        }
    }

    mod accessors {
        use super::*;

        #[test]
        fn lookup_returns_first_match() {
            let items = vec![
                TlvItem::new(TlvType::Identifier, b"first".to_vec()),
                TlvItem::new(TlvType::Identifier, b"second".to_vec()),
            ];
            assert_eq!(lookup(&items, 0x01).unwrap().value, b"first");
        }

        #[test]
        fn lookup_missing_is_none() {
            let tlv = Tlv8::new().with(TlvType::State, [0x02]);
            assert!(tlv.get(TlvType::Salt).is_none());
            assert!(lookup(tlv.items(), 0x42).is_none());
        }

        #[test]
        fn state_and_error_return_first_byte() {
            let tlv = Tlv8::new()
                .with(TlvType::State, [0x05, 0xFF])
                .with(TlvType::Error, [0x02]);
            assert_eq!(tlv.state(), Some(0x05));
            assert_eq!(tlv.error(), Some(0x02));
        }

        #[test]
        fn retry_delay_little_endian() {
            let tlv = Tlv8::new().with(TlvType::RetryDelay, [0x2C, 0x01]);
            assert_eq!(tlv.retry_delay(), Some(300));
        }

        #[test]
        fn error_description_names_code() {
            let tlv = Tlv8::new()
                .with(TlvType::Error, [PairingErrorCode::Backoff as u8])
                .with(TlvType::RetryDelay, [30]);
            let desc = tlv.error_description().unwrap();
            assert!(desc.contains("Backoff"));
            assert!(desc.contains("30 seconds"));
            assert!(Tlv8::new().error_description().is_none());
        }
    }

    mod message_builders {
        use super::*;

        #[test]
        fn pair_setup_m1_contents() {
            let tlv = Tlv8::pair_setup_m1();
            assert_eq!(tlv.state(), Some(1));
            assert_eq!(tlv.get(TlvType::Method), Some([0x00].as_slice()));
        }

        #[test]
        fn pair_verify_m1_contents() {
            let tlv = Tlv8::pair_verify_m1(&[0xAB; 32]);
            assert_eq!(tlv.state(), Some(1));
            assert_eq!(tlv.get(TlvType::PublicKey), Some([0xAB; 32].as_slice()));
        }
    }

    mod enums {
        use super::*;

        #[test]
        fn tlv_type_discriminants() {
            assert_eq!(TlvType::from_byte(0x00), Some(TlvType::Method));
            assert_eq!(TlvType::from_byte(0x0D), Some(TlvType::FragmentLast));
            assert_eq!(TlvType::from_byte(0x13), Some(TlvType::Flags));
            assert_eq!(TlvType::from_byte(0xFF), Some(TlvType::Separator));
            assert_eq!(TlvType::from_byte(0x0E), None);
            assert_eq!(TlvType::from_byte(0xFE), None);
        }

        #[test]
        fn pairing_state_discriminants() {
            assert_eq!(PairingState::M1 as u8, 1);
            assert_eq!(PairingState::from_byte(6), Some(PairingState::M6));
            assert_eq!(PairingState::from_byte(0), None);
            assert_eq!(PairingState::from_byte(7), None);
        }

        #[test]
        fn method_discriminants() {
            assert_eq!(PairingMethod::PairSetup as u8, 0);
            assert_eq!(PairingMethod::PairVerify as u8, 2);
            assert_eq!(PairingMethod::ListPairings as u8, 5);
        }
    }
}
