//! 64-bit AirPlay feature bitmask and status flag parsing.
//!
//! Receivers advertise capabilities via a bitmask in the format
//! "0xLOWER,0xUPPER" where the full value is (UPPER << 32) | LOWER.

use crate::error::FormatError;

/// 64-bit AirPlay feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(pub u64);

impl Features {
    pub const VIDEO: u64 = 1 << 0;
    pub const PHOTO: u64 = 1 << 1;
    pub const VIDEO_FAIRPLAY: u64 = 1 << 2;
    pub const VIDEO_VOLUME_CONTROL: u64 = 1 << 3;
    pub const VIDEO_HLS: u64 = 1 << 4;
    pub const SLIDESHOW: u64 = 1 << 5;
    pub const SCREEN_MIRRORING: u64 = 1 << 7;
    pub const SCREEN_ROTATION: u64 = 1 << 8;
    pub const AUDIO: u64 = 1 << 9;
    pub const AUDIO_REDUNDANT: u64 = 1 << 11;
    pub const FAIRPLAY_SECURE_AUTH: u64 = 1 << 12;
    pub const PHOTO_CACHING: u64 = 1 << 13;
    pub const AUTHENTICATION_MFI: u64 = 1 << 26;
    pub const SUPPORTS_LEGACY_PAIRING: u64 = 1 << 27;

    pub const SUPPORTS_SYSTEM_PAIRING: u64 = 1 << 43;
    pub const SUPPORTS_HOMEKIT_PAIRING: u64 = 1 << 46;
    pub const SUPPORTS_TRANSIENT_PAIRING: u64 = 1 << 48;
}

/// Status flags from the `flags` (or legacy `sf`) TXT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u64);

impl StatusFlags {
    pub const PROBLEM_DETECTED: u64 = 1 << 0;
    pub const NOT_CONFIGURED: u64 = 1 << 1;
    pub const PASSCODE_REQUIRED: u64 = 1 << 3;
    pub const PASSWORD_REQUIRED: u64 = 1 << 7;
    pub const DEVICE_VERIFICATION: u64 = 1 << 9;

    /// Parse a hex ("0x44") or decimal ("68") flags value.
    pub fn from_txt_value(s: &str) -> Result<Self, FormatError> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => {
                u64::from_str_radix(hex, 16).map_err(|_| FormatError::InvalidHex(s.to_string()))?
            }
            None => s
                .parse::<u64>()
                .map_err(|_| FormatError::InvalidValue(format!("invalid flags: {}", s)))?,
        };
        Ok(Self(value))
    }

    pub fn passcode_required(&self) -> bool {
        self.0 & Self::PASSCODE_REQUIRED != 0
    }

    pub fn password_required(&self) -> bool {
        self.0 & Self::PASSWORD_REQUIRED != 0
    }

    pub fn device_verification(&self) -> bool {
        self.0 & Self::DEVICE_VERIFICATION != 0
    }
}

impl Features {
    /// Parse from TXT record format "0xLOWER" or "0xLOWER,0xUPPER".
    pub fn from_txt_value(s: &str) -> Result<Self, FormatError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FormatError::InvalidFormat(
                "empty features string".to_string(),
            ));
        }

        fn parse_hex(part: &str) -> Result<u64, FormatError> {
            let part = part.trim();
            let hex_str = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);

            if hex_str.is_empty() {
                return Err(FormatError::InvalidHex("empty hex value".to_string()));
            }

            u64::from_str_radix(hex_str, 16).map_err(|_| FormatError::InvalidHex(part.to_string()))
        }

        let (lower, upper) = match s.split_once(',') {
            Some((lower_str, upper_str)) => (parse_hex(lower_str)?, parse_hex(upper_str)?),
            None => (parse_hex(s)?, 0u64),
        };

        Ok(Self(lower | (upper << 32)))
    }

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Format as TXT record value.
    pub fn to_txt_value(&self) -> String {
        let lower = self.0 & 0xFFFF_FFFF;
        let upper = self.0 >> 32;

        if upper == 0 {
            format!("0x{:X}", lower)
        } else {
            format!("0x{:X},0x{:X}", lower, upper)
        }
    }

    fn has(&self, bit: u64) -> bool {
        self.0 & bit != 0
    }

    pub fn supports_video(&self) -> bool {
        self.has(Self::VIDEO)
    }

    pub fn supports_photo(&self) -> bool {
        self.has(Self::PHOTO)
    }

    pub fn supports_video_fairplay(&self) -> bool {
        self.has(Self::VIDEO_FAIRPLAY)
    }

    pub fn supports_video_volume_control(&self) -> bool {
        self.has(Self::VIDEO_VOLUME_CONTROL)
    }

    pub fn supports_video_hls(&self) -> bool {
        self.has(Self::VIDEO_HLS)
    }

    pub fn supports_slideshow(&self) -> bool {
        self.has(Self::SLIDESHOW)
    }

    pub fn supports_screen_mirroring(&self) -> bool {
        self.has(Self::SCREEN_MIRRORING)
    }

    pub fn supports_screen_rotation(&self) -> bool {
        self.has(Self::SCREEN_ROTATION)
    }

    pub fn supports_audio(&self) -> bool {
        self.has(Self::AUDIO)
    }

    pub fn supports_audio_redundancy(&self) -> bool {
        self.has(Self::AUDIO_REDUNDANT)
    }

    /// FairPlay SAPv2.5 secure authentication.
    pub fn supports_fairplay_secure_auth(&self) -> bool {
        self.has(Self::FAIRPLAY_SECURE_AUTH)
    }

    pub fn supports_photo_caching(&self) -> bool {
        self.has(Self::PHOTO_CACHING)
    }

    pub fn requires_mfi(&self) -> bool {
        self.has(Self::AUTHENTICATION_MFI)
    }

    pub fn supports_legacy_pairing(&self) -> bool {
        self.has(Self::SUPPORTS_LEGACY_PAIRING)
    }

    pub fn supports_system_pairing(&self) -> bool {
        self.has(Self::SUPPORTS_SYSTEM_PAIRING)
    }

    pub fn supports_homekit_pairing(&self) -> bool {
        self.has(Self::SUPPORTS_HOMEKIT_PAIRING)
    }

    pub fn supports_transient_pairing(&self) -> bool {
        self.has(Self::SUPPORTS_TRANSIENT_PAIRING)
    }

    /// Any pairing scheme this client can drive.
    pub fn advertises_pairing(&self) -> bool {
        self.supports_homekit_pairing()
            || self.supports_transient_pairing()
            || self.supports_system_pairing()
            || self.supports_legacy_pairing()
    }
}
