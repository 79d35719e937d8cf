//! Receiver representation and identification types.

use crate::error::FormatError;
use crate::features::{Features, StatusFlags};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Unique device identifier derived from MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub [u8; 6]);

/// Parsed source version (e.g., "366.0.0").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Which handshake a receiver needs before control traffic can flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRequirement {
    /// Receiver is open; control traffic is sent in the clear.
    None,
    /// Receiver is already paired with this controller.
    VerifyOnly,
    /// Full Pair-Setup with a PIN, then Pair-Verify.
    SetupThenVerify,
}

/// A discovered AirPlay receiver, as handed over by the discovery layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverInfo {
    pub name: String,
    pub ip_addresses: Vec<IpAddr>,
    pub port: u16,
    pub mac_address: DeviceId,
    pub server_version: Version,
    pub model: String,
    pub features: Features,
    pub status_flags: StatusFlags,
    pub password_protected: bool,
    pub passcode_protected: bool,
    pub device_verification_enabled: bool,
    pub protocol_version: u32,
    /// Ed25519 public key from the `pk` TXT field.
    pub public_key: Option<[u8; 32]>,
}

impl DeviceId {
    /// Parse a MAC address from string.
    ///
    /// Supports formats:
    /// - Colon-separated: "AA:BB:CC:DD:EE:FF"
    /// - Hyphen-separated: "AA-BB-CC-DD-EE-FF"
    /// - Bare hex: "AABBCCDDEEFF"
    pub fn from_mac_string(s: &str) -> Result<Self, FormatError> {
        let s = s.trim();

        let parse_octet = |part: &str| {
            if part.len() != 2 {
                return Err(FormatError::InvalidHex(part.to_string()));
            }
            u8::from_str_radix(part, 16).map_err(|_| FormatError::InvalidHex(part.to_string()))
        };

        let bytes: Vec<u8> = if let Some(sep) = [':', '-'].into_iter().find(|c| s.contains(*c)) {
            s.split(sep).map(parse_octet).collect::<Result<_, _>>()?
        } else {
            if s.len() != 12 || !s.is_ascii() {
                return Err(FormatError::InvalidFormat(format!(
                    "MAC address must be 12 hex characters, got {}",
                    s.len()
                )));
            }
            (0..6)
                .map(|i| parse_octet(&s[i * 2..i * 2 + 2]))
                .collect::<Result<_, _>>()?
        };

        let arr: [u8; 6] = bytes.as_slice().try_into().map_err(|_| {
            FormatError::InvalidFormat(format!(
                "MAC address must have 6 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Convert to colon-separated MAC string (uppercase).
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse version from string.
    ///
    /// Accepts "366.0.0", "366.0" and "366"; missing parts default to 0.
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FormatError::InvalidFormat(
                "empty version string".to_string(),
            ));
        }

        let mut parts = s.split('.').map(|p| {
            p.parse::<u32>()
                .map_err(|_| FormatError::InvalidValue(format!("invalid version part: {}", p)))
        });

        let major = parts
            .next()
            .ok_or_else(|| FormatError::InvalidFormat("missing major version".to_string()))??;
        let minor = parts.next().transpose()?.unwrap_or(0);
        let patch = parts.next().transpose()?.unwrap_or(0);

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl ReceiverInfo {
    /// Build a receiver record from a resolved `_airplay._tcp` TXT record.
    pub fn from_txt_record(
        name: &str,
        addresses: Vec<IpAddr>,
        port: u16,
        txt: &HashMap<String, String>,
    ) -> Result<Self, FormatError> {
        let mac_address = txt
            .get("deviceid")
            .ok_or(FormatError::MissingField("deviceid"))
            .and_then(|id| DeviceId::from_mac_string(id))?;

        let features = txt
            .get("features")
            .map(|f| Features::from_txt_value(f))
            .transpose()?
            .unwrap_or_default();

        let model = txt.get("model").cloned().unwrap_or_default();

        let server_version = txt
            .get("srcvers")
            .map(|v| Version::parse(v))
            .transpose()?
            .unwrap_or_default();

        let status_flags = txt
            .get("flags")
            .or_else(|| txt.get("sf"))
            .map(|f| StatusFlags::from_txt_value(f))
            .transpose()?
            .unwrap_or_default();

        let password_protected = txt
            .get("pw")
            .map(|pw| pw == "true" || pw == "1")
            .unwrap_or(false)
            || status_flags.password_required();

        // protovers is "1.1" on most receivers; only the major part matters
        let protocol_version = txt
            .get("protovers")
            .map(|v| Version::parse(v).map(|v| v.major))
            .transpose()?
            .unwrap_or(1);

        let public_key = txt.get("pk").map(|pk| parse_public_key(pk)).transpose()?;

        Ok(Self {
            name: name.to_string(),
            ip_addresses: addresses,
            port,
            mac_address,
            server_version,
            model,
            features,
            status_flags,
            password_protected,
            passcode_protected: status_flags.passcode_required(),
            device_verification_enabled: status_flags.device_verification(),
            protocol_version,
            public_key,
        })
    }

    /// First IPv4 address, if the receiver advertised one.
    pub fn primary_ipv4_address(&self) -> Option<Ipv4Addr> {
        self.ip_addresses.iter().find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    /// Get preferred socket address (prefers IPv4).
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.primary_ipv4_address()
            .map(IpAddr::V4)
            .or_else(|| self.ip_addresses.first().copied())
            .map(|addr| SocketAddr::new(addr, self.port))
    }

    pub fn supports_video(&self) -> bool {
        self.features.supports_video()
    }

    pub fn supports_photo(&self) -> bool {
        self.features.supports_photo()
    }

    pub fn supports_video_fairplay(&self) -> bool {
        self.features.supports_video_fairplay()
    }

    pub fn supports_video_volume_control(&self) -> bool {
        self.features.supports_video_volume_control()
    }

    pub fn supports_video_hls(&self) -> bool {
        self.features.supports_video_hls()
    }

    pub fn supports_slideshow(&self) -> bool {
        self.features.supports_slideshow()
    }

    pub fn supports_screen_mirroring(&self) -> bool {
        self.features.supports_screen_mirroring()
    }

    pub fn supports_screen_rotation(&self) -> bool {
        self.features.supports_screen_rotation()
    }

    pub fn supports_audio(&self) -> bool {
        self.features.supports_audio()
    }

    pub fn supports_audio_redundancy(&self) -> bool {
        self.features.supports_audio_redundancy()
    }

    pub fn supports_fairplay_secure_auth(&self) -> bool {
        self.features.supports_fairplay_secure_auth()
    }

    pub fn supports_photo_caching(&self) -> bool {
        self.features.supports_photo_caching()
    }

    pub fn supports_homekit_pairing(&self) -> bool {
        self.features.supports_homekit_pairing()
    }

    pub fn supports_transient_pairing(&self) -> bool {
        self.features.supports_transient_pairing()
    }

    /// Decide which handshake to run.
    ///
    /// `already_paired` is true when a long-term key for this receiver is
    /// on record from an earlier Pair-Setup.
    pub fn pairing_requirement(&self, already_paired: bool) -> PairingRequirement {
        let protected = self.password_protected
            || self.passcode_protected
            || self.device_verification_enabled;

        if !protected && !self.features.advertises_pairing() {
            return PairingRequirement::None;
        }
        if already_paired {
            PairingRequirement::VerifyOnly
        } else {
            PairingRequirement::SetupThenVerify
        }
    }
}

impl fmt::Display for ReceiverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] model={} srcvers={} features={} protovers={}",
            self.name,
            self.mac_address,
            self.model,
            self.server_version,
            self.features.to_txt_value(),
            self.protocol_version
        )?;
        match self.primary_ipv4_address() {
            Some(ip) => write!(f, " ip={}:{}", ip, self.port),
            None => Ok(()),
        }
    }
}

/// Parse a 32-byte Ed25519 public key from 64 hex characters.
pub fn parse_public_key(hex: &str) -> Result<[u8; 32], FormatError> {
    let hex = hex.trim();

    if hex.len() != 64 || !hex.is_ascii() {
        return Err(FormatError::InvalidFormat(format!(
            "public key must be 64 hex characters, got {}",
            hex.len()
        )));
    }

    let mut arr = [0u8; 32];
    for (i, byte) in arr.iter_mut().enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| FormatError::InvalidHex(pair.to_string()))?;
    }
    Ok(arr)
}
