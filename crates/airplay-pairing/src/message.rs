//! Checks shared by every pairing response.

use airplay_core::error::{FormatError, ProtocolError, Result};
use airplay_crypto::tlv::{PairingState, Tlv8, TlvType};

/// Decode a response and check its error and state tags.
///
/// An `Error` tag wins over everything else, so a rejection carrying the
/// right state still surfaces as [`ProtocolError::Rejected`].
pub(crate) fn parse_response(data: &[u8], expected: PairingState) -> Result<Tlv8> {
    let tlv = Tlv8::parse(data)?;

    if let Some(code) = tlv.error() {
        return Err(ProtocolError::Rejected {
            code,
            retry_delay: tlv.retry_delay(),
        }
        .into());
    }

    match tlv.state() {
        Some(actual) if actual == expected as u8 => Ok(tlv),
        Some(actual) => Err(ProtocolError::UnexpectedState {
            expected: expected as u8,
            actual,
        }
        .into()),
        None => Err(ProtocolError::MissingTag(TlvType::State as u8).into()),
    }
}

/// Value of a mandatory tag.
pub(crate) fn require(tlv: &Tlv8, typ: TlvType) -> Result<&[u8]> {
    tlv.get(typ)
        .ok_or_else(|| ProtocolError::MissingTag(typ as u8).into())
}

/// Mandatory tag holding exactly `N` bytes.
pub(crate) fn require_array<const N: usize>(tlv: &Tlv8, typ: TlvType) -> Result<[u8; N]> {
    let value = require(tlv, typ)?;
    value.try_into().map_err(|_| {
        FormatError::InvalidValue(format!(
            "tag 0x{:02x} has {} bytes, expected {}",
            typ as u8,
            value.len(),
            N
        ))
        .into()
    })
}

/// `a || b || c`, the layout of every pairing signature input.
pub(crate) fn concat3(a: &[u8], b: &[u8], c: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len() + c.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out.extend_from_slice(c);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use airplay_core::Error;

    #[test]
    fn accepts_expected_state() {
        let data = Tlv8::new().with(TlvType::State, [2u8]).encode();
        let tlv = parse_response(&data, PairingState::M2).unwrap();
        assert_eq!(tlv.state(), Some(2));
    }

    #[test]
    fn rejects_other_state() {
        let data = Tlv8::new().with(TlvType::State, [4u8]).encode();
        let err = parse_response(&data, PairingState::M2).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedState { expected: 2, actual: 4 })
        ));
    }

    #[test]
    fn missing_state_is_missing_tag() {
        let data = Tlv8::new().with(TlvType::Salt, vec![0u8; 16]).encode();
        let err = parse_response(&data, PairingState::M2).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingTag(0x06))));
    }

    #[test]
    fn error_tag_wins_with_retry_delay() {
        let data = Tlv8::new()
            .with(TlvType::State, [2u8])
            .with(TlvType::Error, [0x03u8])
            .with(TlvType::RetryDelay, [0x3C, 0x00])
            .encode();
        let err = parse_response(&data, PairingState::M2).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Rejected { code: 3, retry_delay: Some(60) })
        ));
    }

    #[test]
    fn garbage_is_format_error() {
        let err = parse_response(&[0x06, 0x05, 0x01], PairingState::M2).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn require_array_checks_length() {
        let tlv = Tlv8::new().with(TlvType::PublicKey, vec![1u8; 31]);
        assert!(require_array::<32>(&tlv, TlvType::PublicKey).is_err());
        let tlv = Tlv8::new().with(TlvType::PublicKey, vec![1u8; 32]);
        assert_eq!(require_array::<32>(&tlv, TlvType::PublicKey).unwrap(), [1u8; 32]);
        assert!(matches!(
            require_array::<32>(&tlv, TlvType::Signature).unwrap_err(),
            Error::Protocol(ProtocolError::MissingTag(0x0A))
        ));
    }
}
